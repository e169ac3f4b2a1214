//! Remote message model for chat webhooks and the formatter that builds it.

use crate::error::ConfigError;
use crate::formatter::{check_date_format, Formatter, Template, DEFAULT_DATE_FORMAT};
use crate::record::{is_known_attribute, Level, Record};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

pub const MAX_TITLE_LENGTH: usize = 256;
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;
pub const MAX_FIELD_NAME_LENGTH: usize = 256;
pub const MAX_FIELD_VALUE_LENGTH: usize = 1024;
pub const MAX_FIELDS: usize = 25;
/// Combined character budget of all embeds in one message.
pub const MAX_EMBED_TOTAL: usize = 6000;
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;
pub const MAX_CONTENT_LENGTH: usize = 2000;

pub const TRUNCATION_MARKER: &str = "… (truncated)";
const CODE_FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

impl Embed {
    /// Characters counted against the per-message embed budget.
    pub fn char_count(&self) -> usize {
        self.title.chars().count()
            + self.description.chars().count()
            + self
                .fields
                .iter()
                .map(|f| f.name.chars().count() + f.value.chars().count())
                .sum::<usize>()
    }
}

/// One buffered unit of a webhook message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEntry {
    Embed(Embed),
    Text(String),
}

/// JSON body of one webhook request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl WebhookPayload {
    pub fn text(content: impl Into<String>) -> Self {
        WebhookPayload {
            content: Some(content.into()),
            embeds: Vec::new(),
        }
    }
}

/// Pack as many entries from the front of `entries` as fit into a single
/// message. Returns the number of entries consumed and the payload.
///
/// At least one entry is always taken so that a lone oversized entry cannot
/// stall the queue; entries are trimmed to limits when they are formatted.
pub fn pack_payload(entries: &VecDeque<WebhookEntry>) -> (usize, WebhookPayload) {
    let mut payload = WebhookPayload::default();
    let mut taken = 0;
    let mut embed_chars = 0;
    let mut content_chars = 0;

    for entry in entries {
        match entry {
            WebhookEntry::Embed(embed) => {
                let size = embed.char_count();
                if taken > 0
                    && (payload.embeds.len() == MAX_EMBEDS_PER_MESSAGE
                        || embed_chars + size > MAX_EMBED_TOTAL)
                {
                    break;
                }
                embed_chars += size;
                payload.embeds.push(embed.clone());
            }
            WebhookEntry::Text(text) => {
                let separator = usize::from(payload.content.is_some());
                let size = text.chars().count() + separator;
                if taken > 0 && content_chars + size > MAX_CONTENT_LENGTH {
                    break;
                }
                content_chars += size;
                let content = payload.content.get_or_insert_with(String::new);
                if separator == 1 {
                    content.push('\n');
                }
                content.push_str(text);
            }
        }
        taken += 1;
    }

    (taken, payload)
}

/// Cut `text` to at most `max` characters, ending with the truncation marker
/// when anything was removed.
pub fn truncate_with_marker(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max <= marker_len {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Wrap `text` in a code block of at most `max` characters in total. Empty
/// when not even the fences fit.
fn code_block(text: &str, max: usize) -> String {
    if max < 2 * CODE_FENCE.len() {
        return String::new();
    }
    let inner_max = max - 2 * CODE_FENCE.len();
    format!("{CODE_FENCE}{}{CODE_FENCE}", truncate_with_marker(text, inner_max))
}

/// Smallest field worth sending: the fences around one character.
const MIN_FIELD_VALUE: usize = 2 * CODE_FENCE.len() + 1;

fn default_titles() -> BTreeMap<Level, String> {
    BTreeMap::from([
        (Level::Debug, "Debugging".to_string()),
        (Level::Info, "Information".to_string()),
        (Level::Warning, "Warning".to_string()),
        (Level::Error, "Error".to_string()),
        (Level::Critical, "Critical Error".to_string()),
    ])
}

fn default_colors() -> BTreeMap<Level, u32> {
    BTreeMap::from([
        (Level::Debug, 0x00AAFF),
        (Level::Info, 0x3498DB),
        (Level::Warning, 0xFFFF00),
        (Level::Error, 0xFF5733),
        (Level::Critical, 0xFF0000),
    ])
}

const FALLBACK_TITLE: &str = "Log Message";
const FALLBACK_COLOR: u32 = 0x3498DB;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedConfig {
    /// Template rendered into the embed description.
    #[serde(default = "default_message_template")]
    pub format: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_titles")]
    pub titles: BTreeMap<Level, String>,
    #[serde(default = "default_colors")]
    pub colors: BTreeMap<Level, u32>,
    /// Display label → record attribute, rendered as inline fields in label
    /// order.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default = "default_max_description")]
    pub max_description_length: usize,
}

fn default_message_template() -> String {
    "{message}".to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_max_description() -> usize {
    MAX_DESCRIPTION_LENGTH
}

impl Default for EmbedConfig {
    fn default() -> Self {
        EmbedConfig {
            format: default_message_template(),
            date_format: default_date_format(),
            titles: default_titles(),
            colors: default_colors(),
            fields: BTreeMap::new(),
            max_description_length: MAX_DESCRIPTION_LENGTH,
        }
    }
}

/// Builds one embed per record: title and color from the level, the
/// rendered message as a code-block description, and labeled fields.
#[derive(Debug, Clone)]
pub struct EmbedFormatter {
    template: Template,
    date_format: String,
    titles: BTreeMap<Level, String>,
    colors: BTreeMap<Level, u32>,
    fields: Vec<(String, String)>,
    max_description: usize,
}

impl EmbedFormatter {
    pub fn new(config: EmbedConfig) -> Result<Self, ConfigError> {
        let fields: Vec<(String, String)> = config.fields.into_iter().collect();
        Self::with_ordered_fields(
            EmbedConfig {
                fields: BTreeMap::new(),
                ..config
            },
            fields,
        )
    }

    /// Like [`EmbedFormatter::new`] but keeps `fields` in the given order.
    pub fn with_ordered_fields(
        config: EmbedConfig,
        fields: Vec<(String, String)>,
    ) -> Result<Self, ConfigError> {
        let min_description = 2 * CODE_FENCE.len() + TRUNCATION_MARKER.chars().count() + 1;
        if config.max_description_length < min_description
            || config.max_description_length > MAX_DESCRIPTION_LENGTH
        {
            return Err(ConfigError::InvalidOption {
                option: "max_description_length",
                reason: format!("must be between {min_description} and {MAX_DESCRIPTION_LENGTH}"),
            });
        }
        if fields.len() > MAX_FIELDS {
            return Err(ConfigError::InvalidOption {
                option: "fields",
                reason: format!("at most {MAX_FIELDS} fields are allowed"),
            });
        }
        for (_, attribute) in &fields {
            if !is_known_attribute(attribute) {
                return Err(ConfigError::UnknownAttribute(attribute.clone()));
            }
        }
        for color in config.colors.values() {
            if *color > 0xFF_FFFF {
                return Err(ConfigError::InvalidOption {
                    option: "colors",
                    reason: format!("{color:#x} is outside 0x000000..=0xFFFFFF"),
                });
            }
        }

        check_date_format(&config.date_format)?;

        Ok(EmbedFormatter {
            template: Template::parse(&config.format)?,
            date_format: config.date_format,
            titles: config.titles,
            colors: config.colors,
            fields,
            max_description: config.max_description_length,
        })
    }

    /// Build the embed for `record` within the per-message character budget.
    /// The title comes first, then the description, then the fields in
    /// order; a field is left out once its name and a minimal value no
    /// longer fit.
    pub fn format_embed(&self, record: &Record) -> Embed {
        let title = self
            .titles
            .get(&record.level)
            .map(String::as_str)
            .unwrap_or(FALLBACK_TITLE);
        let title = truncate_with_marker(title, MAX_TITLE_LENGTH);
        let color = self.colors.get(&record.level).copied().unwrap_or(FALLBACK_COLOR);
        let mut room = MAX_EMBED_TOTAL.saturating_sub(title.chars().count());

        let body = self.template.render(record, &self.date_format);
        let description = code_block(&body, self.max_description.min(room));
        room = room.saturating_sub(description.chars().count());

        let mut fields = Vec::with_capacity(self.fields.len());
        for (label, attribute) in &self.fields {
            let name = truncate_with_marker(label, MAX_FIELD_NAME_LENGTH);
            let name_len = name.chars().count();
            if room < name_len + MIN_FIELD_VALUE {
                break;
            }
            let value = record.attribute(attribute);
            let value = code_block(
                value.as_deref().unwrap_or("N/A"),
                MAX_FIELD_VALUE_LENGTH.min(room - name_len),
            );
            room -= name_len + value.chars().count();
            fields.push(EmbedField {
                name,
                value,
                inline: true,
            });
        }

        Embed {
            title,
            description,
            color,
            timestamp: record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false),
            fields,
        }
    }

    pub fn format_batch<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> Vec<Embed> {
        records.into_iter().map(|r| self.format_embed(r)).collect()
    }
}

impl Default for EmbedFormatter {
    fn default() -> Self {
        EmbedFormatter {
            template: Template::single_field("message"),
            date_format: default_date_format(),
            titles: default_titles(),
            colors: default_colors(),
            fields: Vec::new(),
            max_description: MAX_DESCRIPTION_LENGTH,
        }
    }
}

/// What a webhook handler turns each record into.
#[derive(Clone)]
pub enum EntryFormat {
    Embed(Arc<EmbedFormatter>),
    /// Plain text lines sent as message content.
    Text(Arc<dyn Formatter>),
}

impl EntryFormat {
    pub fn entry(&self, record: &Record) -> WebhookEntry {
        match self {
            EntryFormat::Embed(f) => WebhookEntry::Embed(f.format_embed(record)),
            EntryFormat::Text(f) => {
                WebhookEntry::Text(truncate_with_marker(&f.format(record), MAX_CONTENT_LENGTH))
            }
        }
    }
}

impl Default for EntryFormat {
    fn default() -> Self {
        EntryFormat::Embed(Arc::new(EmbedFormatter::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn embed_with_chars(n: usize) -> Embed {
        Embed {
            title: String::new(),
            description: "x".repeat(n),
            color: 0,
            timestamp: String::new(),
            fields: Vec::new(),
        }
    }

    #[test]
    fn title_and_color_follow_level() {
        let fmt = EmbedFormatter::default();
        let embed = fmt.format_embed(&Record::new(Level::Critical, "core", "meltdown"));
        assert_eq!(embed.title, "Critical Error");
        assert_eq!(embed.color, 0xFF0000);
        assert_eq!(embed.description, "```meltdown```");
    }

    #[test]
    fn long_message_is_truncated_with_marker() {
        let fmt = EmbedFormatter::new(EmbedConfig {
            max_description_length: 100,
            ..Default::default()
        })
        .unwrap();
        let long = "a".repeat(500);
        let embed = fmt.format_embed(&Record::new(Level::Info, "x", long.as_str()));

        assert_eq!(embed.description.chars().count(), 100);
        assert!(embed.description.ends_with(&format!("{TRUNCATION_MARKER}```")));
    }

    #[test]
    fn short_message_is_not_marked() {
        let fmt = EmbedFormatter::default();
        let embed = fmt.format_embed(&Record::new(Level::Info, "x", "short"));
        assert!(!embed.description.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn fields_keep_configured_order_and_fallback() {
        let fmt = EmbedFormatter::with_ordered_fields(
            EmbedConfig::default(),
            vec![
                ("Logger".into(), "logger".into()),
                ("Line".into(), "line".into()),
                ("Ticket".into(), "extra.ticket".into()),
            ],
        )
        .unwrap();
        let record = Record::new(Level::Error, "api", "oops").with_location("api.rs", 12);
        let embed = fmt.format_embed(&record);

        let names: Vec<_> = embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Logger", "Line", "Ticket"]);
        assert_eq!(embed.fields[0].value, "```api```");
        assert_eq!(embed.fields[1].value, "```12```");
        assert_eq!(embed.fields[2].value, "```N/A```");
        assert!(embed.fields.iter().all(|f| f.inline));
    }

    #[test]
    fn many_long_fields_stay_within_the_embed_budget() {
        let fields = (0..MAX_FIELDS)
            .map(|i| (format!("Field {i:02}"), "message".to_string()))
            .collect();
        let fmt = EmbedFormatter::with_ordered_fields(EmbedConfig::default(), fields).unwrap();
        let message = "m".repeat(2000);
        let embed = fmt.format_embed(&Record::new(Level::Info, "x", message.as_str()));

        assert!(embed.char_count() <= MAX_EMBED_TOTAL, "{}", embed.char_count());
        assert_eq!(embed.description, format!("```{message}```"));
        assert!(!embed.fields.is_empty() && embed.fields.len() < MAX_FIELDS);
        assert!(embed
            .fields
            .iter()
            .all(|f| f.value.chars().count() <= MAX_FIELD_VALUE_LENGTH));
        let last = embed.fields.last().unwrap();
        assert!(last.value.ends_with(&format!("{TRUNCATION_MARKER}```")));
    }

    #[test]
    fn code_block_needs_room_for_its_fences() {
        assert_eq!(code_block("abc", 5), "");
        assert_eq!(code_block("abc", 9), "```abc```");
    }

    #[test]
    fn bad_date_format_is_rejected() {
        let err = EmbedFormatter::new(EmbedConfig {
            date_format: "%Q".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { option: "date_format", .. }));
    }

    #[test]
    fn batch_formats_each_record() {
        let fmt = EmbedFormatter::default();
        let records = [
            Record::new(Level::Info, "a", "one"),
            Record::new(Level::Warning, "a", "two"),
        ];
        let titles: Vec<String> = fmt.format_batch(&records).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, ["Information", "Warning"]);
    }

    #[test]
    fn formatting_is_deterministic() {
        let fmt = EmbedFormatter::new(EmbedConfig {
            fields: BTreeMap::from([
                ("Module".into(), "module".into()),
                ("Logger".into(), "logger".into()),
            ]),
            ..Default::default()
        })
        .unwrap();
        let record = Record::new(Level::Info, "a", "b".repeat(9000).as_str());
        assert_eq!(fmt.format_embed(&record), fmt.format_embed(&record));
    }

    #[test]
    fn invalid_field_attribute_is_rejected() {
        let err = EmbedFormatter::new(EmbedConfig {
            fields: BTreeMap::from([("Oops".into(), "no_such_attr".into())]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAttribute(_)));
    }

    #[test]
    fn pack_respects_embed_count_limit() {
        let entries: VecDeque<_> = (0..13).map(|_| WebhookEntry::Embed(embed_with_chars(10))).collect();
        let (taken, payload) = pack_payload(&entries);
        assert_eq!(taken, MAX_EMBEDS_PER_MESSAGE);
        assert_eq!(payload.embeds.len(), MAX_EMBEDS_PER_MESSAGE);
    }

    #[test]
    fn pack_respects_character_budget() {
        let entries: VecDeque<_> = (0..3).map(|_| WebhookEntry::Embed(embed_with_chars(2500))).collect();
        let (taken, payload) = pack_payload(&entries);
        assert_eq!(taken, 2);
        assert_eq!(payload.embeds.len(), 2);
    }

    #[test]
    fn pack_joins_text_entries() {
        let entries: VecDeque<_> = ["one", "two", "three"]
            .into_iter()
            .map(|s| WebhookEntry::Text(s.to_string()))
            .collect();
        let (taken, payload) = pack_payload(&entries);
        assert_eq!(taken, 3);
        assert_eq!(payload.content.as_deref(), Some("one\ntwo\nthree"));
        assert!(payload.embeds.is_empty());
    }

    #[test]
    fn pack_always_takes_one_entry() {
        let entries = VecDeque::from([WebhookEntry::Embed(embed_with_chars(MAX_EMBED_TOTAL + 1))]);
        assert_eq!(pack_payload(&entries).0, 1);
    }

    #[test]
    fn payload_serializes_without_empty_parts() {
        let body = serde_json::to_value(WebhookPayload::text("hi")).unwrap();
        assert_eq!(body, serde_json::json!({ "content": "hi" }));
    }
}
