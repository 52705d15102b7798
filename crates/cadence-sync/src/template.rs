//! Status text rendering and comparison.

use cadence_core::policy::SyncPolicy;
use rand::{Rng, RngCore};

/// Render the policy's template for a track.
///
/// `{title}` and `{artist}` are filled only when their display toggles are
/// on. `{emoji}` is dropped, since the emoji is sent as its own field.
/// Separators left dangling by empty fields are stripped and whitespace is
/// collapsed.
pub fn render(policy: &SyncPolicy, title: &str, performer: &str) -> String {
  let title     = if policy.show_title { title } else { "" };
  let performer = if policy.show_performer { performer } else { "" };

  let filled = policy
    .template
    .replace("{emoji}", "")
    .replace("{title}", title)
    .replace("{artist}", performer);

  tidy(&filled)
}

fn tidy(text: &str) -> String {
  let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
  let mut t = collapsed.as_str();
  loop {
    if t == "-" {
      t = "";
    } else if let Some(rest) = t.strip_suffix(" -") {
      t = rest.trim_end();
    } else if let Some(rest) = t.strip_prefix("- ") {
      t = rest.trim_start();
    } else {
      break;
    }
  }
  t.to_owned()
}

/// Pick the emoji for one write: uniformly from the rotation when it is
/// non-empty, else the default.
pub fn pick_emoji(policy: &SyncPolicy, rng: &mut dyn RngCore) -> String {
  if policy.rotating_emojis.is_empty() {
    return policy.default_emoji.clone();
  }
  let i = rng.gen_range(0..policy.rotating_emojis.len());
  policy.rotating_emojis[i].clone()
}

/// Canonical form used when comparing the sink's text with what was last
/// written: trimmed, with the sink's HTML entity escapes decoded.
pub fn normalize_status_text(text: &str) -> String {
  text
    .trim()
    .replace("&amp;", "&")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
}
