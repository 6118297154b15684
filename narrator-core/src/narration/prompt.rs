//! Commentary prompt construction.

use std::time::Duration;

/// Commentary personas rotated round-robin, one per event.
pub const DEFAULT_STYLES: &[&str] = &[
    "seasoned play-by-play sports commentary",
    "technical analyst focusing on efficiency and patterns",
    "strategic commentator analyzing decision-making",
    "investigative reporter uncovering the story behind the actions",
    "emergency management expert analyzing response coordination",
];

/// Everything that varies between two prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// Serialized events, oldest first.
    pub events: &'a [String],
    /// Recent commentary, oldest first. Listed as topics to avoid.
    pub recent_topics: &'a [String],
    /// 1-based number of the event that triggered this cycle.
    pub event_number: u64,
    pub session_elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    styles: Vec<String>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_STYLES.iter().map(|s| s.to_string()).collect())
    }
}

impl PromptBuilder {
    pub fn new(styles: Vec<String>) -> Self {
        Self { styles }
    }

    pub fn styles(&self) -> &[String] {
        &self.styles
    }

    /// Style for the `event_number`-th event: `styles[(n - 1) % len]`.
    pub fn style_for(&self, event_number: u64) -> &str {
        if self.styles.is_empty() {
            return "live";
        }
        let idx = (event_number.saturating_sub(1) % self.styles.len() as u64) as usize;
        &self.styles[idx]
    }

    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        let style = self.style_for(ctx.event_number);
        let topics = if ctx.recent_topics.is_empty() {
            "none yet, this is the first commentary".to_string()
        } else {
            ctx.recent_topics.join("; ")
        };

        format!(
            "You are a high-energy commentator providing {style} on a team of AI agents working live.\n\
             \n\
             RECENT AGENT ACTIVITY (oldest first):\n\
             {events}\n\
             \n\
             Focus on what the agents are discovering and deciding, not just which tools they call.\n\
             Connect findings across agents. Do not talk about the commentary itself.\n\
             \n\
             Recent topics already covered, do not repeat them: {topics}\n\
             \n\
             Event #{event} | Duration: {secs:.1}s | Style: {style}\n\
             \n\
             Keep it to a few sharp sentences.",
            events = ctx.events.join("\n"),
            event = ctx.event_number,
            secs = ctx.session_elapsed.as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(styles: &[&str]) -> PromptBuilder {
        PromptBuilder::new(styles.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn styles_rotate_round_robin_from_first_event() {
        let b = builder(&["a", "b", "c"]);
        let picked: Vec<_> = (1..=7).map(|n| b.style_for(n)).collect();
        assert_eq!(picked, ["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn empty_style_list_still_yields_a_style() {
        assert_eq!(builder(&[]).style_for(3), "live");
    }

    #[test]
    fn prompt_lists_events_in_order_and_history_as_topics() {
        let events = vec!["{\"action\":\"first\"}".to_string(), "{\"action\":\"second\"}".to_string()];
        let topics = vec!["road closures".to_string(), "shelter capacity".to_string()];
        let prompt = builder(&["a", "b"]).build(&PromptContext {
            events: &events,
            recent_topics: &topics,
            event_number: 2,
            session_elapsed: Duration::from_millis(12_340),
        });

        let first = prompt.find("first").expect("first event");
        let second = prompt.find("second").expect("second event");
        assert!(first < second);
        assert!(prompt.contains("do not repeat them: road closures; shelter capacity"));
        assert!(prompt.contains("Event #2 | Duration: 12.3s | Style: b"));
    }

    #[test]
    fn first_prompt_says_no_topics_yet() {
        let prompt = PromptBuilder::default().build(&PromptContext {
            events: &["e".to_string()],
            recent_topics: &[],
            event_number: 1,
            session_elapsed: Duration::ZERO,
        });
        assert!(prompt.contains("none yet"));
        assert!(prompt.contains(DEFAULT_STYLES[0]));
    }
}
