use std::collections::HashSet;

use crate::model::Article;
use crate::util::{complete_scheme_relative, media_sources};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpeg", "jpg", "gif", "png", "bmp", "webp"];

/// Whether an attachment URL names an image file.
fn is_image_attachment(url: &str) -> bool {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    path.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Media URLs worth caching for an article, without duplicates.
///
/// Content `<img>`/`<video>` sources come first, then image attachments.
pub fn candidate_urls(article: &Article) -> Vec<String> {
    let mut urls = media_sources(&article.content);
    let mut seen: HashSet<String> = urls.iter().cloned().collect();

    for attachment in &article.attachments {
        let url = complete_scheme_relative(attachment.trim());
        let lower = url.to_ascii_lowercase();
        let http = lower.starts_with("http://") || lower.starts_with("https://");
        if http && is_image_attachment(&url) && seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    urls
}
