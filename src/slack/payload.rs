//! Slack Web API JSON turned into the engine's typed records.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::sync::model::{
    Author, Bookmark, Channel, ChannelKind, Emoji, FileRef, LegacyAttachment, Message, Pin,
    SlackTs, User,
};

fn str_field<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

fn owned(value: &Value, pointer: &str) -> String {
    str_field(value, pointer).unwrap_or_default().to_string()
}

pub fn next_cursor(response: &Value) -> Option<String> {
    str_field(response, "/response_metadata/next_cursor").map(ToOwned::to_owned)
}

pub fn parse_channel(value: &Value) -> Option<Channel> {
    let id = str_field(value, "/id")?.to_string();
    let flag = |name: &str| value.get(name).and_then(Value::as_bool).unwrap_or(false);

    let kind = if flag("is_im") {
        ChannelKind::Direct
    } else if flag("is_mpim") {
        ChannelKind::Group
    } else if flag("is_private") || flag("is_group") {
        ChannelKind::Private
    } else {
        ChannelKind::Public
    };
    // Direct messages carry no name; the peer id stands in for it.
    let name = str_field(value, "/name")
        .or_else(|| str_field(value, "/user"))
        .unwrap_or(id.as_str())
        .to_string();
    let members = match kind {
        ChannelKind::Direct => str_field(value, "/user")
            .map(|user| vec![user.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    Some(Channel {
        id,
        name,
        kind,
        members,
    })
}

pub fn parse_user(value: &Value) -> Option<User> {
    let id = str_field(value, "/id")?.to_string();
    let is_bot = value.get("is_bot").and_then(Value::as_bool).unwrap_or(false)
        || id == "USLACKBOT";
    let avatar_url = str_field(value, "/profile/image_original")
        .or_else(|| str_field(value, "/profile/image_512"))
        .or_else(|| str_field(value, "/profile/image_192"))
        .map(ToOwned::to_owned);

    Some(User {
        name: str_field(value, "/name").unwrap_or(id.as_str()).to_string(),
        display_name: str_field(value, "/profile/display_name")
            .or_else(|| str_field(value, "/profile/real_name"))
            .unwrap_or_default()
            .to_string(),
        title: owned(value, "/profile/title"),
        email: str_field(value, "/profile/email").map(ToOwned::to_owned),
        first_name: owned(value, "/profile/first_name"),
        last_name: owned(value, "/profile/last_name"),
        is_bot,
        is_deleted: value.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        avatar_url,
        id,
    })
}

/// Files without a download url, or with a zero timestamp (deleted or
/// external placeholders), cannot be transferred.
pub fn parse_file(value: &Value) -> Option<FileRef> {
    let url = str_field(value, "/url_private_download")?.to_string();
    if value.get("timestamp").and_then(Value::as_i64) == Some(0) {
        return None;
    }
    Some(FileRef {
        id: owned(value, "/id"),
        name: str_field(value, "/name")
            .or_else(|| str_field(value, "/title"))
            .unwrap_or("attachment")
            .to_string(),
        size: value.get("size").and_then(Value::as_u64).unwrap_or(0),
        url,
        mimetype: str_field(value, "/mimetype").map(ToOwned::to_owned),
    })
}

fn parse_attachment(value: &Value) -> LegacyAttachment {
    LegacyAttachment {
        author_id: str_field(value, "/author_id").map(ToOwned::to_owned),
        text: str_field(value, "/text").map(ToOwned::to_owned),
        fallback: str_field(value, "/fallback").map(ToOwned::to_owned),
    }
}

pub fn parse_message(channel_id: &str, value: &Value) -> Option<Message> {
    let ts = SlackTs::new(str_field(value, "/ts")?);
    let author = match str_field(value, "/user") {
        Some(user) => Author::User(user.to_string()),
        None => Author::Bot {
            bot_id: str_field(value, "/bot_id").map(ToOwned::to_owned),
            username: str_field(value, "/username")
                .or_else(|| str_field(value, "/bot_profile/name"))
                .map(ToOwned::to_owned),
        },
    };

    let raw_attachments = value
        .get("attachments")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    // Files shared inside legacy attachments are flattened onto the message.
    let mut seen = HashSet::new();
    let files = value
        .get("files")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .chain(
            raw_attachments
                .iter()
                .filter_map(|attachment| attachment.get("files").and_then(Value::as_array))
                .flatten(),
        )
        .filter_map(parse_file)
        .filter(|file| seen.insert(file.url.clone()))
        .collect();

    Some(Message {
        channel_id: channel_id.to_string(),
        author,
        text: value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        files,
        attachments: raw_attachments.iter().map(parse_attachment).collect(),
        reply_count: value
            .get("reply_count")
            .and_then(Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0),
        thread_ts: str_field(value, "/thread_ts").map(SlackTs::new),
        replies: Vec::new(),
        ts,
    })
}

pub fn parse_pin(value: &Value) -> Option<Pin> {
    str_field(value, "/message/ts").map(|ts| Pin { ts: SlackTs::new(ts) })
}

pub fn parse_bookmark(value: &Value) -> Option<Bookmark> {
    Some(Bookmark {
        title: owned(value, "/title"),
        link: str_field(value, "/link")?.to_string(),
    })
}

/// `emoji.list` maps names to image urls or to `alias:<name>`. Aliases are
/// resolved against the same map; dangling aliases (built-in emoji) are dropped.
pub fn parse_emoji_map(map: &Map<String, Value>) -> Vec<Emoji> {
    let mut emoji: Vec<Emoji> = map
        .iter()
        .filter_map(|(name, value)| {
            let mut target = value.as_str()?;
            let mut hops = 0;
            while let Some(alias) = target.strip_prefix("alias:") {
                hops += 1;
                if hops > 4 {
                    return None;
                }
                target = map.get(alias)?.as_str()?;
            }
            Some(Emoji {
                name: name.clone(),
                url: target.to_string(),
            })
        })
        .collect();
    emoji.sort_by(|a, b| a.name.cmp(&b.name));
    emoji
}
