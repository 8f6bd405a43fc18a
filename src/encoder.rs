use base64::Engine;
use image::ImageFormat;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhotoError {
    #[error("photo is empty")]
    Empty,
    #[error("unsupported photo format, please upload a JPEG or PNG")]
    Unsupported,
}

/// An uploaded photo ready to be attached to a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: &'static str,
    pub base64: String,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn encode_photo(bytes: &[u8]) -> Result<InlineImage, PhotoError> {
    if bytes.is_empty() {
        return Err(PhotoError::Empty);
    }
    let mime_type = match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        _ => return Err(PhotoError::Unsupported),
    };
    Ok(InlineImage { mime_type, base64: encode_base64(bytes) })
}
