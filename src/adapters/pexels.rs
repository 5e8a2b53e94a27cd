use super::MediaSearch;
use super::http;
use crate::compose::MediaClip;
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "pexels";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Deserialize)]
struct PexelsVideo {
    id: u64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    link: String,
    width: Option<u32>,
    height: Option<u32>,
}

/// Smallest rendition between 360p and 720p, else whatever comes first.
fn pick_file(files: &[VideoFile]) -> Option<&VideoFile> {
    let mut sorted: Vec<&VideoFile> = files.iter().collect();
    sorted.sort_by_key(|f| f.height.unwrap_or(0));
    sorted
        .iter()
        .copied()
        .find(|f| (360..=720).contains(&f.height.unwrap_or(0)))
        .or_else(|| files.first())
}

fn to_candidates(response: SearchResponse, min_duration: f64) -> Vec<MediaClip> {
    let clips: Vec<MediaClip> = response
        .videos
        .into_iter()
        .filter_map(|video| {
            let file = pick_file(&video.video_files)?;
            Some(MediaClip {
                id: format!("pexels-{}", video.id),
                url: file.link.clone(),
                duration: video.duration,
                width: file.width.unwrap_or(0),
                height: file.height.unwrap_or(0),
            })
        })
        .filter(|c| c.duration > 0.0)
        .collect();
    let (mut long_enough, short): (Vec<_>, Vec<_>) = clips.into_iter().partition(|c| c.duration >= min_duration);
    long_enough.extend(short);
    long_enough
}

/// Portrait stock footage search.
#[derive(Debug, Clone)]
pub struct PexelsSearch {
    client: Client,
    api_key: String,
    endpoint: String,
    per_page: u32,
}

impl PexelsSearch {
    pub fn new(api_key: impl Into<String>, per_page: u32, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: http::client(SERVICE, timeout)?,
            api_key: api_key.into(),
            endpoint: "https://api.pexels.com/videos/search".to_string(),
            per_page,
        })
    }
}

#[async_trait]
impl MediaSearch for PexelsSearch {
    async fn search_media(&self, query: &str, min_duration: f64) -> Result<Vec<MediaClip>, ServiceError> {
        let per_page = self.per_page.to_string();
        let request = self
            .client
            .get(&self.endpoint)
            .header(AUTHORIZATION, &self.api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("orientation", "portrait"),
                ("size", "medium"),
            ]);
        let response: SearchResponse = http::send_json(SERVICE, request).await?;
        debug!("Pexels returned {} videos for '{}'", response.videos.len(), query);
        let candidates = to_candidates(response, min_duration);
        info!("Found {} clip candidates for '{}'", candidates.len(), query);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "page": 1,
        "videos": [
            {"id": 1, "duration": 4, "video_files": [
                {"link": "https://v/1-hd.mp4", "width": 1080, "height": 1920},
                {"link": "https://v/1-sd.mp4", "width": 540, "height": 960},
                {"link": "https://v/1-low.mp4", "width": 360, "height": 640}
            ]},
            {"id": 2, "duration": 12, "video_files": [
                {"link": "https://v/2-uhd.mp4", "width": 2160, "height": 3840}
            ]},
            {"id": 3, "duration": 9, "video_files": []},
            {"id": 4, "duration": 0, "video_files": [
                {"link": "https://v/4.mp4", "width": 720, "height": 1280}
            ]}
        ]
    }"#;

    #[test]
    fn long_enough_clips_come_first() {
        let response: SearchResponse = serde_json::from_str(BODY).unwrap();
        let clips = to_candidates(response, 8.0);
        let ids: Vec<&str> = clips.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["pexels-2", "pexels-1"]);
    }

    #[test]
    fn smallest_mid_resolution_rendition_is_picked() {
        let response: SearchResponse = serde_json::from_str(BODY).unwrap();
        let clips = to_candidates(response, 0.0);
        assert_eq!(clips[0].url, "https://v/1-low.mp4");
        assert_eq!((clips[0].width, clips[0].height), (360, 640));
        assert_eq!(clips[1].url, "https://v/2-uhd.mp4");
    }

    #[test]
    fn missing_videos_field_is_empty() {
        let response: SearchResponse = serde_json::from_str(r#"{"page":1}"#).unwrap();
        assert!(to_candidates(response, 1.0).is_empty());
    }
}
