//! Markup embedded into documents for an uploaded object.

use crate::models::mime::RenderMethod;

const IFRAME_STYLE: &str = "overflow:hidden;height:400;width:100%";

/// Pick markup from the object's content type.
///
/// `video/*` and `audio/*` get a sized, fullscreen-capable iframe,
/// `text/html` a bare iframe, everything else inline image markup.
pub fn render(url: &str, content_type: &str) -> String {
    let content_type = content_type.trim().to_ascii_lowercase();
    if content_type.starts_with("video/") || content_type.starts_with("audio/") {
        media_iframe(url)
    } else if content_type == "text/html" {
        format!(r#"<iframe src="{}"></iframe>"#, url)
    } else {
        image(url)
    }
}

/// Markup for an explicit render method from the MIME table.
pub fn render_method(method: RenderMethod, url: &str) -> String {
    match method {
        RenderMethod::Image => image(url),
        RenderMethod::Iframe => media_iframe(url),
        RenderMethod::Link => url.to_string(),
    }
}

fn image(url: &str) -> String {
    format!("![S3 File]({})", url)
}

fn media_iframe(url: &str) -> String {
    format!(
        r#"<iframe src="{}" style="{}" allowfullscreen></iframe>"#,
        url, IFRAME_STYLE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://localhost:4998/obsidian/a.bin?client=default&bucket=b";

    #[test]
    fn video_and_audio_get_styled_fullscreen_iframe() {
        for ct in ["video/mp4", "video/webm", "audio/mpeg", "audio/wav", "Video/MP4"] {
            let out = render(URL, ct);
            assert_eq!(
                out,
                format!(
                    r#"<iframe src="{}" style="overflow:hidden;height:400;width:100%" allowfullscreen></iframe>"#,
                    URL
                ),
                "content type {}",
                ct
            );
        }
    }

    #[test]
    fn html_gets_bare_iframe() {
        assert_eq!(render(URL, "text/html"), format!(r#"<iframe src="{}"></iframe>"#, URL));
    }

    #[test]
    fn html_variants_are_not_exact_matches() {
        // Parameters or prefixes fall through to the image rule.
        assert_eq!(render(URL, "text/html; charset=utf-8"), format!("![S3 File]({})", URL));
        assert_eq!(render(URL, "text/htmlx"), format!("![S3 File]({})", URL));
    }

    #[test]
    fn everything_else_is_inline_image() {
        for ct in ["image/png", "image/svg+xml", "application/pdf", "text/plain", ""] {
            assert_eq!(render(URL, ct), format!("![S3 File]({})", URL), "content type {:?}", ct);
        }
    }

    #[test]
    fn media_prefix_must_include_slash() {
        assert_eq!(render(URL, "videogame"), format!("![S3 File]({})", URL));
        assert_eq!(render(URL, "audio"), format!("![S3 File]({})", URL));
    }

    #[test]
    fn render_method_covers_every_variant() {
        assert_eq!(render_method(RenderMethod::Image, URL), format!("![S3 File]({})", URL));
        assert!(render_method(RenderMethod::Iframe, URL).contains("allowfullscreen"));
        assert_eq!(render_method(RenderMethod::Link, URL), URL);
    }
}
