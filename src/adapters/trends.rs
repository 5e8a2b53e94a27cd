use super::TrendSource;
use super::http::{self, invalid};
use crate::config::Niche;
use crate::error::ServiceError;
use crate::script::Topic;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "reddit";

/// Hand-picked evergreen topics, used when no live feed is wanted.
pub fn curated_topics(niche: Niche) -> &'static [&'static str] {
    match niche {
        Niche::Motivation => &[
            "morning routine habits successful people",
            "how to build self discipline",
            "overcoming procrastination tips",
            "growth mindset vs fixed mindset",
            "habits of millionaires",
            "how to stay focused",
            "productivity hacks that work",
            "building confidence quickly",
            "stop overthinking techniques",
            "mental toughness tips",
            "goal setting strategies",
            "how to wake up early",
        ],
        Niche::Tech => &[
            "AI tools everyone should use",
            "smartphone hidden features",
            "cybersecurity tips for beginners",
            "how AI is changing jobs",
            "tech gadgets worth buying",
            "programming tips for beginners",
            "ChatGPT tips and tricks",
            "quantum computing explained simply",
            "electric vehicles future",
        ],
        Niche::Facts => &[
            "psychology facts about human behavior",
            "amazing science facts",
            "history facts nobody knows",
            "human body amazing facts",
            "space facts mind blowing",
            "animal kingdom facts",
            "facts about dreams",
            "ocean mysteries unsolved",
            "universe facts mind blowing",
        ],
        Niche::Finance => &[
            "passive income ideas",
            "investing for beginners",
            "how to save money fast",
            "money mistakes to avoid",
            "building wealth in your 20s",
            "stock market for beginners",
            "budgeting tips that work",
            "debt payoff strategies",
            "retirement planning tips",
        ],
        Niche::Entertainment => &[
            "movie facts you didnt know",
            "behind the scenes secrets",
            "famous people before fame",
            "plot twists in movies",
            "TV show hidden details",
            "gaming tips and tricks",
            "internet mysteries",
            "movie mistakes you missed",
            "pop culture moments",
        ],
    }
}

/// Picks a random curated topic. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct CuratedTrends;

#[async_trait]
impl TrendSource for CuratedTrends {
    async fn fetch_trend(&self, niche: Niche) -> Result<Topic, ServiceError> {
        let topics = curated_topics(niche);
        let title = topics
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("interesting tips");
        info!("Selected curated topic: {}", title);
        Ok(Topic::new(title, niche))
    }
}

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    title: String,
    over_18: Option<bool>,
    stickied: Option<bool>,
}

/// Takes the hottest usable post title from the niche's subreddit.
#[derive(Debug, Clone)]
pub struct RedditTrends {
    client: Client,
    base_url: String,
    limit: usize,
}

impl RedditTrends {
    pub fn new(timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: http::client(SERVICE, timeout)?,
            base_url: "https://www.reddit.com".to_string(),
            limit: 25,
        })
    }
}

fn pick_title(listing: RedditListing) -> Option<String> {
    listing
        .data
        .children
        .into_iter()
        .map(|c| c.data)
        .find(|post| {
            let nsfw = post.over_18.unwrap_or(false);
            let pinned = post.stickied.unwrap_or(false);
            if nsfw || pinned {
                debug!("Skipping post (NSFW or pinned): {}", post.title);
            }
            !nsfw && !pinned && !post.title.trim().is_empty()
        })
        .map(|post| post.title.trim().to_string())
}

#[async_trait]
impl TrendSource for RedditTrends {
    async fn fetch_trend(&self, niche: Niche) -> Result<Topic, ServiceError> {
        let url = format!("{}/r/{}/hot.json?limit={}", self.base_url, niche.subreddit(), self.limit);
        let listing: RedditListing = http::send_json(SERVICE, self.client.get(&url)).await?;
        let title = pick_title(listing)
            .ok_or_else(|| invalid(SERVICE, format!("no usable posts in r/{}", niche.subreddit())))?;
        info!("Selected trending post: {}", title);
        Ok(Topic::new(title, niche))
    }
}
