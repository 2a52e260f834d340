//! Plain-text rendering of [`ViewState`] for the terminal.

use vjts_client::view::{Feedback, ResultLink, StatusKind, ViewState};
use vjts_core::gallery::CropGallery;

/// Longest crop reference printed verbatim.
const MAX_REF_LEN: usize = 72;

pub fn feedback_line(feedback: &Feedback) -> String {
    match feedback {
        Feedback::Status { text, kind } => {
            let tag = match kind {
                StatusKind::Info => "..",
                StatusKind::Success => "ok",
                StatusKind::Warning => "!!",
                StatusKind::Error => "xx",
            };
            format!("[{tag}] {text}")
        }
        Feedback::Log(raw) => format!("[log]\n{raw}"),
    }
}

/// Short form of a crop reference. Inline `data:` URLs are summarized.
pub fn crop_label(image_ref: &str) -> String {
    if let Some(rest) = image_ref.strip_prefix("data:") {
        let media = rest.split([';', ',']).next().unwrap_or("unknown");
        return format!("inline {media} ({} bytes)", image_ref.len());
    }
    if image_ref.chars().count() > MAX_REF_LEN {
        let head: String = image_ref.chars().take(MAX_REF_LEN).collect();
        return format!("{head}...");
    }
    image_ref.to_string()
}

pub fn gallery_lines(crops: &CropGallery) -> Vec<String> {
    if crops.is_empty() {
        return vec!["No plate crops received".to_string()];
    }
    let mut lines = vec![format!(
        "Plate crops ({} of {}, newest first):",
        crops.visible_count(),
        crops.len()
    )];
    lines.extend(
        crops
            .visible()
            .enumerate()
            .map(|(i, r)| format!("  {:>3}. {}", i + 1, crop_label(r))),
    );
    if crops.hidden_count() > 0 {
        lines.push(format!(
            "  ... {} more (raise --crop-pages to show them)",
            crops.hidden_count()
        ));
    }
    lines
}

pub fn result_line(result: &ResultLink) -> String {
    format!("Result video: {}\n  {}", result.result_ref, result.download_url)
}

/// Everything shown once a run ends: gallery, trajectory and result link.
pub fn summary(view: &ViewState) -> String {
    let mut out = gallery_lines(&view.crops).join("\n");
    if let Some(panel) = &view.trajectory {
        out.push_str("\n\n");
        out.push_str(&panel.to_string());
    }
    if let Some(result) = &view.result {
        out.push_str("\n\n");
        out.push_str(&result_line(result));
    }
    out
}
