use vidtutor_schema::{format_time, ChatContext};

pub const FRAME_NOTE: &str =
    "This is the current frame of the video. Please use this visual context when answering questions.";

/// `http(s)://` URLs and `data:image/` URIs can be sent as image input.
pub fn is_image_reference(value: &str) -> bool {
    let value = value.trim_start();
    value.starts_with("https://") || value.starts_with("http://") || value.starts_with("data:image/")
}

/// Builds the tutor instruction for one request.
///
/// With `image_attached` the frame travels as an image part, so it is
/// only mentioned, not embedded.
pub fn build_system_prompt(ctx: &ChatContext, image_attached: bool) -> String {
    let mut prompt = format!(
        "You are an advanced AI tutor with real-time access to the video content the user is watching. You can:\n\
         1. See what's happening in the video through the current frame\n\
         2. Read the transcript at any timestamp\n\
         3. Know exactly where the user is in the video ({})\n\n\
         Current context:",
        format_time(ctx.time_seconds())
    );

    if let Some(title) = &ctx.video_title {
        prompt.push_str(&format!("\n📺 Video: {title}"));
    }
    if let Some(transcript) = &ctx.current_transcript_text {
        prompt.push_str(&format!("\n🗣 Current segment: {transcript}"));
    }
    match &ctx.image_context {
        Some(_) if image_attached => {
            prompt.push_str("\n🖼 Current frame: attached as an image");
        }
        Some(frame) if !is_image_reference(frame) => {
            prompt.push_str(&format!("\n🖼 Current frame: {frame}"));
        }
        _ => {}
    }
    prompt
}
