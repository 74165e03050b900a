pub mod archive;
mod error;
mod middleware;
mod routes;

pub use error::{ApiError, ErrorResponse};
pub use middleware::log_request_errors;
pub use routes::{
    ConvertResponse, DownloadAllParams, check_file, convert, download, download_all,
    list_output_formats, progress, waitlist,
};
