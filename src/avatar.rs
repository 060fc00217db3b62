use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{ info, warn };
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("invalid avatar url: {0}")] Url(#[from] url::ParseError),
    #[error("http: {0}")] Http(#[from] reqwest::Error),
    #[error("avatar url returned HTTP {0}")] Status(u16),
    #[error("avatar response is not an image ({0})")] NotAnImage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Avatar {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

pub async fn fetch_avatar(http: &reqwest::Client, url: &str) -> Result<Avatar, AvatarError> {
    let url = Url::parse(url)?;
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AvatarError::Status(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    if !content_type.starts_with("image/") {
        return Err(AvatarError::NotAnImage(content_type));
    }

    let bytes = response.bytes().await?.to_vec();
    Ok(Avatar { content_type, bytes })
}

/// Decorative only: any failure is logged and the avatar is simply left out.
pub async fn fetch_avatar_best_effort(url: Option<&str>) -> Option<Avatar> {
    let url = url.filter(|u| !u.trim().is_empty())?;
    match fetch_avatar(&reqwest::Client::new(), url).await {
        Ok(avatar) => {
            info!("Avatar loaded from {} ({} bytes)", url, avatar.bytes.len());
            Some(avatar)
        }
        Err(e) => {
            warn!("Failed to load avatar from {}: {}", url, e);
            None
        }
    }
}
