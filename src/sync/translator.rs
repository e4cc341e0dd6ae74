use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::model::{LegacyAttachment, SlackTs};

static USER_MENTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@([A-Z0-9]+)(?:\|[^<>]*)?>").expect("valid user mention regex"));
static CHANNEL_MENTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<#([A-Z0-9]+)(?:\|[^<>]*)?>").expect("valid channel mention regex")
});
static BROADCAST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!(here|channel|everyone)(?:\|[^<>]*)?>").expect("valid broadcast regex")
});
static LABELED_LINK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([^@#!<>|\s][^<>|\s]*)\|([^<>]+)>").expect("valid labeled link regex")
});

/// Resolves Slack ids to destination names without creating anything.
pub trait ReferenceLookup {
    fn user_mention(&self, source_user_id: &str) -> Option<String>;
    fn channel_mention(&self, source_channel_id: &str) -> Option<String>;
}

type Substitution = fn(&Captures<'_>, &dyn ReferenceLookup) -> Option<String>;

struct Rule {
    pattern: &'static Lazy<Regex>,
    substitute: Substitution,
}

// Mentions must run before links: `<@U1|name>` also fits the generic link shape.
static RULES: [Rule; 4] = [
    Rule {
        pattern: &USER_MENTION_REGEX,
        substitute: |caps, lookup| lookup.user_mention(&caps[1]).map(|name| format!("@{name}")),
    },
    Rule {
        pattern: &CHANNEL_MENTION_REGEX,
        substitute: |caps, lookup| {
            lookup
                .channel_mention(&caps[1])
                .map(|name| format!("~{name}"))
        },
    },
    Rule {
        pattern: &BROADCAST_REGEX,
        substitute: |caps, _| {
            let literal = match &caps[1] {
                "here" => "@here",
                "channel" => "@channel",
                _ => "@all",
            };
            Some(literal.to_string())
        },
    },
    Rule {
        pattern: &LABELED_LINK_REGEX,
        substitute: |caps, _| {
            let url = caps[1].trim();
            let label = caps[2].trim();
            if url.is_empty() || label.is_empty() {
                None
            } else {
                Some(format!("[{label}]({url})"))
            }
        },
    },
];

/// Rewrites Slack inline markup into Mattermost markdown. Tokens that cannot be
/// resolved are left as they are.
pub fn translate(body: &str, lookup: &dyn ReferenceLookup) -> String {
    let mut text = body.to_string();
    for rule in &RULES {
        text = rule
            .pattern
            .replace_all(&text, |caps: &Captures<'_>| {
                (rule.substitute)(caps, lookup).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();
    }
    text
}

/// Source user ids mentioned in a raw Slack body, in order of appearance.
pub fn mentioned_users(body: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in USER_MENTION_REGEX.captures_iter(body) {
        let id = caps[1].to_string();
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

/// Appends legacy attachments as quotes: `>>> <@author> text` or `>>> fallback`.
pub fn compose_body(text: &str, attachments: &[LegacyAttachment]) -> String {
    let mut body = text.to_string();
    for attachment in attachments {
        let quoted = match (&attachment.author_id, &attachment.text) {
            (Some(author), Some(text)) if !text.is_empty() => format!(">>> <@{author}> {text} \n"),
            _ => match attachment.fallback.as_deref().or(attachment.text.as_deref()) {
                Some(fallback) if !fallback.is_empty() => format!(">>> {fallback} "),
                _ => continue,
            },
        };
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&quoted);
    }
    body
}

/// Appends the human-readable source timestamp to a migrated body.
pub fn with_provenance(text: &str, ts: &SlackTs) -> String {
    let stamp = ts.to_datetime().format("%Y-%m-%d %H:%M:%S");
    if text.is_empty() {
        format!(" slack_ts:{stamp}")
    } else {
        format!("{text}\n\n slack_ts: {stamp}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    #[derive(Default)]
    struct Names {
        users: HashMap<&'static str, &'static str>,
        channels: HashMap<&'static str, &'static str>,
    }

    impl ReferenceLookup for Names {
        fn user_mention(&self, id: &str) -> Option<String> {
            self.users.get(id).map(|name| name.to_string())
        }

        fn channel_mention(&self, id: &str) -> Option<String> {
            self.channels.get(id).map(|name| name.to_string())
        }
    }

    fn names() -> Names {
        Names {
            users: HashMap::from([("U123", "alice"), ("U9", "bob")]),
            channels: HashMap::from([("C1", "town-square")]),
        }
    }

    #[test]
    fn unresolved_channel_mention_stays_verbatim() {
        let lookup = names();
        assert_eq!(
            translate("<@U123> check <#C456|eng>", &lookup),
            "@alice check <#C456|eng>"
        );
    }

    #[test_case("<@U9|bob> hi", "@bob hi"; "labeled user mention")]
    #[test_case("see <#C1|general>", "see ~town-square"; "channel mention")]
    #[test_case("<!here> and <!channel>", "@here and @channel"; "broadcasts")]
    #[test_case("<!everyone>", "@all"; "everyone")]
    #[test_case("<https://example.com|docs>", "[docs](https://example.com)"; "labeled link")]
    #[test_case("<https://example.com>", "<https://example.com>"; "bare link untouched")]
    #[test_case("<@U404> hi", "<@U404> hi"; "unknown user untouched")]
    #[test_case("<|label>", "<|label>"; "missing url")]
    fn translates_tokens(input: &str, expected: &str) {
        assert_eq!(translate(input, &names()), expected);
    }

    #[test]
    fn mentions_win_over_links() {
        let lookup = Names::default();
        // Unresolved mentions must not be reinterpreted as `[label](@U1)`.
        assert_eq!(translate("<@U1|someone>", &lookup), "<@U1|someone>");
        assert_eq!(translate("<#C2|room>", &lookup), "<#C2|room>");
    }

    #[test]
    fn translation_reaches_a_fixed_point() {
        let lookup = names();
        let once = translate(
            "<@U123> see <https://a.example/x|the doc> in <#C1|general> <!here>",
            &lookup,
        );
        assert_eq!(once, "@alice see [the doc](https://a.example/x) in ~town-square @here");
        assert_eq!(translate(&once, &lookup), once);
    }

    #[test]
    fn mentioned_users_are_unique_and_ordered() {
        assert_eq!(
            mentioned_users("<@U2> <@U1|x> <@U2>"),
            vec!["U2".to_string(), "U1".to_string()]
        );
    }

    #[test]
    fn provenance_formats_utc_timestamp() {
        let ts = SlackTs::new("1700000000.000100");
        assert_eq!(
            with_provenance("hello", &ts),
            "hello\n\n slack_ts: 2023-11-14 22:13:20"
        );
        assert_eq!(with_provenance("", &ts), " slack_ts:2023-11-14 22:13:20");
    }

    #[test]
    fn legacy_attachments_are_quoted() {
        let attachments = vec![
            LegacyAttachment {
                author_id: Some("U1".to_string()),
                text: Some("shared text".to_string()),
                fallback: None,
            },
            LegacyAttachment {
                author_id: None,
                text: None,
                fallback: Some("a preview".to_string()),
            },
        ];
        assert_eq!(
            compose_body("look", &attachments),
            "look\n>>> <@U1> shared text \n>>> a preview "
        );
    }
}
