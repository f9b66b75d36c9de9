//! Utility modules.

pub mod file;
pub mod pii;
pub mod secrets;
pub mod text;

pub use file::{read_file_bytes, write_atomic};
pub use pii::PiiAnonymizer;
pub use secrets::SecretScanner;
pub use text::{has_meaningful_content, strip_html_tags};
