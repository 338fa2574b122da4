//! The result handed back to the HTTP layer after a successful conversion.

use bytes::Bytes;

/// A fully buffered converter output.
///
/// The payload is read completely before a response is built, so a caller
/// either receives the whole file or an error, never a truncated body.
#[derive(Clone, Debug)]
pub struct ConvertedFile {
    /// Suggested download name: the uploaded name with the output
    /// extension appended (`a.txt` + `.pdf` = `a.txt.pdf`).
    pub file_name: String,

    /// Converted bytes.
    pub bytes: Bytes,
}
