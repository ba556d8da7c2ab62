//! Wire form of envelopes in the exchange channel
//!
//! Envelopes are posted as an HTML `<pre>` block containing the escaped,
//! pretty-printed JSON. Clients that render the markup hand back the bare
//! JSON, so both forms are accepted on receive.

use warden_core::{Envelope, GroupId, MessageId};

/// A message observed in the exchange channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: GroupId,
    pub message_id: MessageId,
    /// Text, or the caption of a document
    pub text: Option<String>,
    /// File handle of an attached document
    pub document: Option<String>,
}

/// Escape `&`, `<`, `>`, `"` and `'` for the `<pre>` body
pub fn escape_html(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

/// Decode every named and numeric character reference
pub fn unescape_html(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Render an envelope as channel text
pub fn format_wire(envelope: &Envelope) -> Option<String> {
    let json = envelope.encode()?;
    Some(format!("<pre>{}</pre>", escape_html(&json)))
}

/// Parse channel text back into an envelope
///
/// Never fails loudly: absent or malformed payloads yield `None`.
pub fn receive(text: Option<&str>) -> Option<Envelope> {
    let text = text?.trim();

    match text
        .strip_prefix("<pre>")
        .and_then(|rest| rest.strip_suffix("</pre>"))
    {
        Some(inner) => Envelope::decode(&unescape_html(inner)),
        None => Envelope::decode(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_round_trip() {
        let envelope = Envelope::new(
            "AVATAR",
            &["REGEX"],
            "regex",
            "count",
            json!({"ban_words": {"<b>&\"x'": 2}}),
        );

        let wire = format_wire(&envelope).unwrap();
        assert!(wire.starts_with("<pre>{"));
        assert!(wire.contains("&lt;b&gt;&amp;"));
        assert_eq!(receive(Some(&wire)), Some(envelope));
    }

    #[test]
    fn test_numeric_references_decoded() {
        let wire = "<pre>{&#34;from&#34;: &quot;MANAGE&quot;, &quot;to&quot;: [&quot;AVATAR&quot;], \
                    &quot;action&quot;: &quot;update&quot;, &quot;type&quot;: &quot;refresh&quot;, \
                    &quot;data&quot;: &quot;it&#x27;s &#39;all&#39;&quot;}</pre>";
        let envelope = receive(Some(wire)).unwrap();
        assert_eq!(envelope.from, "MANAGE");
        assert_eq!(envelope.data, json!("it's 'all'"));

        let escaped = escape_html("a'b\"<&>");
        assert!(!escaped.contains(['\'', '"', '<', '>']));
        assert_eq!(unescape_html(&escaped), "a'b\"<&>");
    }

    #[test]
    fn test_receive_raw_json() {
        let text = r#"{"from": "MANAGE", "to": ["AVATAR"], "action": "update", "type": "refresh", "data": "all"}"#;
        let envelope = receive(Some(text)).unwrap();
        assert_eq!(envelope.from, "MANAGE");
        assert_eq!(envelope.data, json!("all"));
    }

    #[test]
    fn test_receive_absent_or_malformed() {
        assert!(receive(None).is_none());
        assert!(receive(Some("<pre>not json</pre>")).is_none());
        assert!(receive(Some("<pre>")).is_none());
    }
}
