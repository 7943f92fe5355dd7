use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub const MAX_INPUT_CHARS: usize = 4000;

lazy_static::lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").expect("valid tag regex");
    static ref SQL_KEYWORD_RE: Regex =
        Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|ALTER|UNION|CREATE|WHERE)\b")
            .expect("valid keyword regex");
    static ref SHELL_META_RE: Regex = Regex::new(r"(;|\||\$\(|`)").expect("valid shell regex");
}

/// Cleans an inbound prompt before it reaches the model.
///
/// Strips markup tags, defuses SQL keywords by lower-casing them, blanks out
/// shell metacharacters and caps the length at [`MAX_INPUT_CHARS`].
pub fn sanitize_input(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = TAG_RE.replace_all(text, "");
    let text = SQL_KEYWORD_RE.replace_all(&text, |caps: &regex::Captures| caps[1].to_lowercase());
    let text = SHELL_META_RE.replace_all(&text, " ");

    if text.chars().count() > MAX_INPUT_CHARS {
        warn!("Input text truncated to {} characters", MAX_INPUT_CHARS);
        return text.chars().take(MAX_INPUT_CHARS).collect();
    }

    text.into_owned()
}

/// HTML-escapes generated text.
///
/// The mapping is per character, so escaping streamed chunks one by one
/// yields the same text as escaping their concatenation.
pub fn sanitize_output(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Spawns a relay that escapes every chunk on its way to `out`.
///
/// Returns the raw-side sender and the relay task. Once the raw sender is
/// dropped and the task is joined, every chunk has been delivered. If `out`
/// closes, the relay stops and the raw side starts failing sends.
pub fn spawn_sanitizing_relay(out: mpsc::Sender<String>) -> (mpsc::Sender<String>, JoinHandle<()>) {
    let (raw_tx, mut raw_rx) = mpsc::channel::<String>(64);
    let relay = tokio::spawn(async move {
        while let Some(chunk) = raw_rx.recv().await {
            if out.send(sanitize_output(&chunk)).await.is_err() {
                break;
            }
        }
    });
    (raw_tx, relay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_input_strips_tags() {
        assert_eq!(
            sanitize_input("<script>alert('XSS')</script>"),
            "alert('XSS')"
        );
    }

    #[test]
    fn test_sanitize_input_lowercases_sql_keywords() {
        let out = sanitize_input("SELECT * FROM users WHERE id = 1");
        assert!(out.contains("select"));
        assert!(out.contains("where"));
        assert!(!out.contains("SELECT"));
        // Only whole words are touched.
        assert_eq!(sanitize_input("SELECTION"), "SELECTION");
    }

    #[test]
    fn test_sanitize_input_blanks_shell_metacharacters() {
        let out = sanitize_input("ls; rm -rf / | cat $(whoami) `id`");
        assert!(!out.contains(';'));
        assert!(!out.contains('|'));
        assert!(!out.contains("$("));
        assert!(!out.contains('`'));
    }

    #[test]
    fn test_sanitize_input_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_INPUT_CHARS + 10);
        let out = sanitize_input(&long);
        assert_eq!(out.chars().count(), MAX_INPUT_CHARS);
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize_input(""), "");
        assert_eq!(sanitize_output(""), "");
    }

    #[test]
    fn test_sanitize_output_escapes_html() {
        assert!(sanitize_output("<script>").contains("&lt;"));
        assert!(sanitize_output("function() { return > 0; }").contains("&gt;"));
        assert_eq!(sanitize_output("a & \"b\""), "a &amp; &quot;b&quot;");
    }

    #[test]
    fn test_sanitize_output_is_chunk_stable() {
        let chunks = ["<di", "v cla", "ss=\"x\">", "A & B</div>"];
        let joined: String = chunks.concat();
        let escaped_chunks: String = chunks.iter().map(|c| sanitize_output(c)).collect();
        assert_eq!(escaped_chunks, sanitize_output(&joined));
    }

    #[tokio::test]
    async fn test_relay_escapes_in_order() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (raw_tx, relay) = spawn_sanitizing_relay(out_tx);
        raw_tx.send("<a>".to_string()).await.unwrap();
        raw_tx.send("b".to_string()).await.unwrap();
        drop(raw_tx);
        relay.await.unwrap();

        assert_eq!(out_rx.recv().await.as_deref(), Some("&lt;a&gt;"));
        assert_eq!(out_rx.recv().await.as_deref(), Some("b"));
        assert_eq!(out_rx.recv().await, None);
    }
}
