//! Transform parameters shared by the key builder, the optimizer and the
//! transformer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Requested output encoding.
///
/// `jpg` and `jpeg` both encode JPEG but stay distinct values so the cache
/// key reflects exactly what the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Keep the source format.
    #[default]
    Auto,
    Webp,
    Png,
    Jpeg,
    Jpg,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Webp => "webp",
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Jpg => "jpg",
        }
    }

    /// MIME type for a concrete format, `None` for [`OutputFormat::Auto`].
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Webp => Some("image/webp"),
            Self::Png => Some("image/png"),
            Self::Jpeg | Self::Jpg => Some("image/jpeg"),
        }
    }

    /// File extension used for stored payloads, `None` for [`OutputFormat::Auto`].
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Webp => Some("webp"),
            Self::Png => Some("png"),
            Self::Jpeg | Self::Jpg => Some("jpeg"),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of `auto|webp|png|jpeg|jpg`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid output format: {0}")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "webp" => Ok(Self::Webp),
            "png" => Ok(Self::Png),
            "jpeg" => Ok(Self::Jpeg),
            "jpg" => Ok(Self::Jpg),
            other => Err(UnknownFormat(other.to_owned())),
        }
    }
}

/// Resize and encode options for one request.
///
/// Absent values are `None`; there is no separate "unset" state, so an
/// omitted `w` and a missing width always key identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TransformParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u32>,
    pub format: OutputFormat,
}

impl TransformParams {
    /// `true` when the request asks for a bounding-box resize.
    pub fn resizes(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// `true` when the source cannot be passed through unchanged.
    pub fn reencodes(&self) -> bool {
        self.format != OutputFormat::Auto || self.quality.is_some() || self.resizes()
    }

    /// Encoding the output will use, or `None` when the source bytes pass
    /// through untouched.
    ///
    /// `f=auto` keeps a JPEG, PNG, or WebP source (judged by `src_path`) in
    /// its own format and re-encodes anything else to `fallback`.
    pub fn target_format(&self, src_path: &str, fallback: OutputFormat) -> Option<OutputFormat> {
        if self.format != OutputFormat::Auto {
            return Some(self.format);
        }
        if !self.reencodes() {
            return None;
        }
        Some(match extension_for_path(src_path) {
            Some("jpeg") => OutputFormat::Jpeg,
            Some("png") => OutputFormat::Png,
            Some("webp") => OutputFormat::Webp,
            _ => fallback,
        })
    }

    /// `Content-Type` of the output for a source at `src_path`.
    pub fn output_content_type(&self, src_path: &str, fallback: OutputFormat) -> &'static str {
        self.target_format(src_path, fallback)
            .and_then(OutputFormat::content_type)
            .or_else(|| content_type_for_path(src_path))
            .unwrap_or(FALLBACK_CONTENT_TYPE)
    }

    /// File extension of the output for a source at `src_path`.
    pub fn output_extension(&self, src_path: &str, fallback: OutputFormat) -> &'static str {
        self.target_format(src_path, fallback)
            .and_then(OutputFormat::extension)
            .or_else(|| extension_for_path(src_path))
            .unwrap_or(FALLBACK_EXTENSION)
    }
}

/// Used when neither the request nor the source path names a type.
const FALLBACK_CONTENT_TYPE: &str = "image/jpeg";
const FALLBACK_EXTENSION: &str = "jpeg";

/// Maps a source URL path extension to an image MIME type.
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "webp" => Some("image/webp"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Maps a source URL path extension to a payload file extension.
pub fn extension_for_path(path: &str) -> Option<&'static str> {
    content_type_for_path(path).and_then(|ct| match ct {
        "image/webp" => Some("webp"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpeg"),
        "image/gif" => Some("gif"),
        _ => None,
    })
}
