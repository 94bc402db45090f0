//! Prompt text for every stage. Structured stages ask for a bare JSON object so the
//! parsers in [`super::parse`] can stay strict about field names.

use std::collections::BTreeMap;

use crate::models::Milestone;

pub const DEFAULT_MAX_MILESTONES: usize = 5;
pub const MIN_MILESTONES: usize = 3;

pub fn plan_prompt(goal: &str, history: &str, max_milestones: usize) -> String {
    let max = max_milestones.max(1);
    let min = MIN_MILESTONES.min(max);
    let history = if history.trim().is_empty() {
        "Nothing has been done yet.".to_string()
    } else {
        history.to_string()
    };

    format!(
        "You are planning how to guide a user through a task on their computer.\n\
         The attached screenshot shows their screen right now.\n\n\
         Goal: {goal}\n\n\
         Already done:\n{history}\n\n\
         Break the REMAINING work into {min} to {max} milestones. Each milestone is a \
         checkpoint that can be verified by looking at the screen. Do not repeat work that is \
         already done.\n\n\
         Respond with JSON only:\n\
         {{\"milestones\": [{{\"title\": \"short name\", \"description\": \"what the screen \
         looks like once this is done\"}}]}}"
    )
}

pub fn navigate_prompt(
    goal: &str,
    milestone: &Milestone,
    blackboard: &BTreeMap<String, String>,
) -> String {
    let memory = if blackboard.is_empty() {
        "(empty)".to_string()
    } else {
        blackboard
            .iter()
            .map(|(key, value)| format!("- {key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are guiding a user one step at a time. The attached screenshot shows their \
         screen right now.\n\n\
         Overall goal: {goal}\n\
         Current milestone: {title}\n\
         Milestone done when: {description}\n\n\
         Stored values:\n{memory}\n\n\
         Give exactly ONE action the user should take next. Never give a list of steps.\n\
         - \"instruction\": the single action, in plain words.\n\
         - \"success_criteria\": what the screen looks like right after the action succeeds.\n\
         - \"memory_writes\": values VISIBLE on the screen that later steps will need (ids, \
         keys, confirmation codes). Use {{}} when there are none. Never invent values.\n\
         - \"value_to_copy\": only when the action is pasting a stored value, the key of that \
         value; otherwise null.\n\n\
         Respond with JSON only:\n\
         {{\"instruction\": \"...\", \"success_criteria\": \"...\", \"memory_writes\": {{}}, \
         \"value_to_copy\": null}}",
        title = milestone.title,
        description = milestone.description,
    )
}

pub fn watch_prompt(success_criteria: &str) -> String {
    format!(
        "Decide whether the attached screenshot satisfies this condition:\n\
         {success_criteria}\n\n\
         Judge the substance. Cosmetic differences such as scroll position, cursor location \
         or window placement do not matter. Always explain your verdict.\n\n\
         Respond with JSON only:\n\
         {{\"is_complete\": true, \"reasoning\": \"...\"}}"
    )
}

pub fn summarize_prompt(milestone: &Milestone, actions: &[String], word_limit: usize) -> String {
    let actions = if actions.is_empty() {
        "(no recorded actions)".to_string()
    } else {
        actions
            .iter()
            .map(|action| format!("- {action}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Summarize what was accomplished in ONE sentence of at most {word_limit} words.\n\n\
         Milestone: {title}\n\
         Details: {description}\n\
         Actions taken:\n{actions}\n\n\
         Reply with the sentence only.",
        title = milestone.title,
        description = milestone.description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prompt_mentions_history_or_fresh_start() {
        let fresh = plan_prompt("Open Safari", "", 5);
        assert!(fresh.contains("Nothing has been done yet."));
        assert!(fresh.contains("3 to 5 milestones"));

        let resumed = plan_prompt("Open Safari", "1. Opened the Dock.", 4);
        assert!(resumed.contains("1. Opened the Dock."));
        assert!(resumed.contains("3 to 4 milestones"));
    }

    #[test]
    fn navigate_prompt_renders_memory_sorted() {
        let milestone = Milestone::new(1, "Sign in", "Dashboard visible");
        let memory = BTreeMap::from([
            ("token".to_string(), "abc".to_string()),
            ("account".to_string(), "42".to_string()),
        ]);
        let prompt = navigate_prompt("Deploy", &milestone, &memory);
        let account = prompt.find("- account: 42").unwrap();
        let token = prompt.find("- token: abc").unwrap();
        assert!(account < token);
        assert!(prompt.contains("Current milestone: Sign in"));
    }
}
