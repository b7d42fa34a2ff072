//! Text transformation stages, applied in a fixed order:
//! cleaner, button extraction, header/footer, replacements, line
//! removal. Every stage is a pure function of its inputs; translation
//! is asynchronous and runs in the engine after these stages.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::content::ButtonRow;
use crate::model::{CleanerOptions, LineRemoval, ReplacementRule, Task};

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\w+").expect("static pattern"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("static pattern"));
static TME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"t\.me/\S+").expect("static pattern"));
static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\w+").expect("static pattern"));
static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]\(.*?\)").expect("static pattern"));
static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[ \t]*\n){2,}").expect("static pattern"));

/// Stateless text transformer.
pub struct TransformPipeline;

impl TransformPipeline {
    /// Run every configured stage of a task over the message text.
    pub fn apply(text: &str, task: &Task, buttons: &[ButtonRow]) -> String {
        let mut out = Self::clean(text, &task.cleaner);

        if task.convert_buttons {
            out = Self::append_buttons(&out, buttons);
        }

        out = Self::decorate(&out, task.header.as_deref(), task.footer.as_deref());
        out = Self::replace(&out, &task.replacements);
        out = Self::remove_lines(&out, &task.remove_lines);
        out
    }

    /// Strip mentions, links, hashtags, and markdown links per the
    /// task's toggles, collapse blank-line runs, trim. Idempotent:
    /// cleaning already-clean text changes nothing.
    pub fn clean(text: &str, options: &CleanerOptions) -> String {
        let mut out = text.to_string();

        if options.remove_markdown_links {
            out = MD_LINK_RE.replace_all(&out, "").into_owned();
        }
        if options.remove_urls {
            out = URL_RE.replace_all(&out, "").into_owned();
            out = TME_RE.replace_all(&out, "").into_owned();
        }
        if options.remove_usernames {
            out = MENTION_RE.replace_all(&out, "").into_owned();
        }
        if options.remove_hashtags {
            out = HASHTAG_RE.replace_all(&out, "").into_owned();
        }

        out = BLANK_RUN_RE.replace_all(&out, "\n\n").into_owned();
        out.trim().to_string()
    }

    /// Render inline keyboard labels as bulleted lines under the text.
    fn append_buttons(text: &str, buttons: &[ButtonRow]) -> String {
        let labels: Vec<&str> = buttons
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|label| !label.is_empty())
            .collect();
        if labels.is_empty() {
            return text.to_string();
        }

        let rendered: Vec<String> = labels.iter().map(|label| format!("• {label}")).collect();
        if text.is_empty() {
            rendered.join("\n")
        } else {
            format!("{text}\n\n{}", rendered.join("\n"))
        }
    }

    /// `header + blank + body + blank + footer`; absent parts contribute
    /// nothing, including their separator.
    pub fn decorate(body: &str, header: Option<&str>, footer: Option<&str>) -> String {
        let parts: Vec<&str> = [header, Some(body), footer]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect();
        parts.join("\n\n")
    }

    /// Substring replacements in list order, literal or case-insensitive.
    fn replace(text: &str, rules: &[ReplacementRule]) -> String {
        let mut out = text.to_string();
        for rule in rules {
            if rule.old.is_empty() {
                continue;
            }
            if rule.case_sensitive {
                out = out.replace(&rule.old, &rule.new);
            } else {
                match RegexBuilder::new(&regex::escape(&rule.old))
                    .case_insensitive(true)
                    .build()
                {
                    Ok(re) => out = re.replace_all(&out, rule.new.as_str()).into_owned(),
                    Err(error) => {
                        warn!(old = %rule.old, %error, "Skipping replacement rule");
                    }
                }
            }
        }
        out
    }

    /// Drop lines containing a keyword (case-insensitive) or listed by
    /// 1-indexed position.
    fn remove_lines(text: &str, removal: &LineRemoval) -> String {
        if removal.is_empty() {
            return text.to_string();
        }
        let keywords: Vec<String> = removal.keywords.iter().map(|k| k.to_lowercase()).collect();

        text.lines()
            .enumerate()
            .filter(|(index, line)| {
                let number = index + 1;
                if removal.line_numbers.contains(&number) {
                    return false;
                }
                let line_lower = line.to_lowercase();
                !keywords.iter().any(|kw| line_lower.contains(kw))
            })
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatRef;
    use chrono::Utc;

    fn task() -> Task {
        Task {
            id: 1,
            owner_id: 1,
            source: ChatRef::Id(-100),
            source_title: None,
            destination: ChatRef::Id(-200),
            destination_title: None,
            enabled: true,
            forward_delay: None,
            header: None,
            footer: None,
            translate_to: None,
            watermark: None,
            power_on: None,
            power_off: None,
            remove_duplicates: false,
            convert_buttons: false,
            cleaner: CleanerOptions::default(),
            replacements: vec![],
            remove_lines: LineRemoval::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cleaner_strips_links_mentions_hashtags() {
        let out = TransformPipeline::clean(
            "Check out https://t.me/spam @user1 #promo",
            &CleanerOptions::default(),
        );
        assert_eq!(out, "Check out");
    }

    #[test]
    fn cleaner_is_idempotent() {
        let inputs = [
            "Check out https://t.me/spam @user1 #promo",
            "line one\n\n\n\nline two",
            "plain text, nothing to strip",
            "  padded  \n\n [link](https://x.y) \n t.me/chan ",
            "",
        ];
        for input in inputs {
            let once = TransformPipeline::clean(input, &CleanerOptions::default());
            let twice = TransformPipeline::clean(&once, &CleanerOptions::default());
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn cleaner_toggles_are_independent() {
        let options = CleanerOptions {
            remove_usernames: false,
            remove_urls: true,
            remove_hashtags: false,
            remove_markdown_links: false,
        };
        let out = TransformPipeline::clean("hi @bob see https://a.b #tag", &options);
        assert_eq!(out, "hi @bob see  #tag");
    }

    #[test]
    fn cleaner_collapses_blank_runs() {
        let out = TransformPipeline::clean("a\n\n\n   \n\nb", &CleanerOptions::default());
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn decorate_full_and_partial() {
        assert_eq!(
            TransformPipeline::decorate("body", Some("HEAD"), Some("FOOT")),
            "HEAD\n\nbody\n\nFOOT"
        );
        assert_eq!(TransformPipeline::decorate("body", Some("HEAD"), None), "HEAD\n\nbody");
        assert_eq!(TransformPipeline::decorate("body", None, Some("FOOT")), "body\n\nFOOT");
        assert_eq!(TransformPipeline::decorate("body", None, None), "body");
        assert_eq!(TransformPipeline::decorate("", Some("HEAD"), None), "HEAD");
    }

    #[test]
    fn buttons_rendered_as_bullets() {
        let mut t = task();
        t.convert_buttons = true;
        let buttons = vec![vec!["Join".to_string(), "Visit".to_string()], vec!["More".to_string()]];
        let out = TransformPipeline::apply("Announcement", &t, &buttons);
        assert_eq!(out, "Announcement\n\n• Join\n• Visit\n• More");
    }

    #[test]
    fn buttons_ignored_when_disabled() {
        let t = task();
        let buttons = vec![vec!["Join".to_string()]];
        assert_eq!(TransformPipeline::apply("text", &t, &buttons), "text");
    }

    #[test]
    fn replacements_apply_in_order() {
        let mut t = task();
        t.replacements = vec![
            ReplacementRule { old: "foo".into(), new: "bar".into(), case_sensitive: true },
            ReplacementRule { old: "bar".into(), new: "baz".into(), case_sensitive: true },
        ];
        assert_eq!(TransformPipeline::apply("foo", &t, &[]), "baz");
    }

    #[test]
    fn replacement_case_insensitive() {
        let mut t = task();
        t.replacements = vec![ReplacementRule {
            old: "Old Brand".into(),
            new: "New Brand".into(),
            case_sensitive: false,
        }];
        assert_eq!(TransformPipeline::apply("OLD BRAND rocks", &t, &[]), "New Brand rocks");
    }

    #[test]
    fn line_removal_by_keyword_and_number() {
        let mut t = task();
        t.remove_lines = LineRemoval {
            keywords: vec!["AD".into()],
            line_numbers: vec![1],
        };
        let out = TransformPipeline::apply("first\nkeep this\nbuy our ad now", &t, &[]);
        assert_eq!(out, "keep this");
    }

    #[test]
    fn full_stage_order() {
        let mut t = task();
        t.header = Some("HEAD".into());
        t.footer = Some("FOOT".into());
        t.replacements = vec![ReplacementRule {
            old: "HEAD".into(),
            new: "TOP".into(),
            case_sensitive: true,
        }];
        // Replacements run after decoration, so the header is rewritten too.
        let out = TransformPipeline::apply("hello https://spam.io", &t, &[]);
        assert_eq!(out, "TOP\n\nhello\n\nFOOT");
    }
}
