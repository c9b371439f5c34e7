pub mod count_tokens;
pub mod generate_content;
pub mod get_model;
pub mod list_models;
pub mod middleware;
pub mod schema_hygiene;
pub mod stream2nostream;

pub use schema_hygiene::clean_for_gemini;

pub use middleware::{
    CountTokensFn, CountTokensRequest, CountTokensResponse, GenerateContentRequest,
    GenerateContentResponse, ModelGetRequest, ModelGetResponse, ModelListRequest,
    ModelListResponse, NostreamToStream, Op, OutputAccumulator, Proto, Request, Response,
    StreamEvent, StreamFormat, StreamToNostream, StreamTransformer, TransformContext,
    TransformError, UsageAccumulator, UsageError, UsageSummary, fallback_usage_with_count_tokens,
    output_for_counting, stream_format, transform_request, transform_response,
    usage_from_response,
};
