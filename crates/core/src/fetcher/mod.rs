//! Source retrieval through an external downloader.
//!
//! Remote video URLs are validated, handed to the retrieval tool as an
//! argument vector, and the resulting media file is staged in a shared
//! temp directory under a per-fetch base name.

mod authenticated;
mod config;
mod error;
mod output;
mod process;
mod router;
mod traits;
mod validate;
mod ytdlp;

pub use authenticated::AuthenticatedFetcher;
pub use config::{FetcherConfig, InstagramConfig};
pub use error::FetchError;
pub use output::{is_image, mime_for_path};
pub use router::Fetchers;
pub use traits::{FetchedMedia, SourceFetcher, SourceMetadata};
pub use validate::{validate_source_url, Platform, UrlRejection, ValidatedUrl, MAX_URL_LENGTH};
pub use ytdlp::YtDlpFetcher;
