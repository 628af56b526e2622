//! Prompt templates and rendering
//!
//! Each graph node speaks to the model through a named template rendered
//! against the current workflow state. Rendering produces a single system
//! turn; placeholders use `{name}` syntax and every template receives the
//! current time and the deployment locale.

use chrono::Local;

use crate::memory::MemoryFields;
use crate::state::ChatTurn;

/// Named prompt templates consumed by the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// Binary routing decision: retrieve first, or answer directly.
    Route,
    /// Direct answer, no retrieval.
    GeneralAnswer,
    /// Rewrite of the user query for memory recall.
    GetMemory,
    /// Iteration-controller decision with structured output.
    Supervisor,
    /// Final answer synthesis over accumulated evidence.
    Answer,
    /// Distill a new memory, or decline with the NO_UPDATE sentinel.
    UpdateMemory,
}

/// Sentinel the update-memory template asks the model to emit when the
/// interaction is not worth remembering.
pub const NO_UPDATE_SENTINEL: &str = "NO_UPDATE";

const ROUTE_PROMPT: &str = "\
- Current time: {CURRENT_TIME}
- Preferred language: {locale}

You are the routing step of an assistant with long-term memory. Decide \
whether answering the user's question requires looking up external or \
historical information (knowledge base, past interactions, facts that may \
have changed over time), or whether it can be answered directly from \
general knowledge and the conversation so far.

User question:
{user_query}

Reply with exactly one word: `true` if retrieval is required, `false` \
otherwise. Do not add any other text.";

const GENERAL_ANSWER_PROMPT: &str = "\
- Current time: {CURRENT_TIME}
- Preferred language: {locale}

You are a helpful assistant. Answer the user's question directly and \
concisely, using the conversation so far for context.

User question:
{user_query}";

const GET_MEMORY_PROMPT: &str = "\
- Current time: {CURRENT_TIME}
- Preferred language: {locale}

Rewrite the user's question as a short, self-contained search query \
suitable for recalling related past question/answer pairs. Resolve \
pronouns and references from the conversation. Reply with the rewritten \
query only, no explanations.

User question:
{user_query}";

const SUPERVISOR_PROMPT: &str = "\
# Role

You are the decision node of a multi-round retrieval loop. Judge whether \
the information gathered so far is sufficient to answer the user's \
question, and decide whether to launch another retrieval round.

# Known information

- Current time: {CURRENT_TIME}
- Preferred language: {locale}

## The user's question

{user_query}

## Recalled memories

{memory_info}

## Retrieval results so far

{retrieved_information}

## Sub-tasks already issued

{task_description}

# Your task

Return a JSON object with exactly these fields:
- `needs_more_info` (boolean): false if the known information suffices, \
true if another retrieval round is needed.
- `task_description_item` (string): empty when `needs_more_info` is \
false; otherwise one concise sentence describing exactly what new \
information to retrieve. It must be specific, and must not repeat a \
sub-task already issued.

Return strictly the JSON object, with no additional text.";

const ANSWER_PROMPT: &str = "\
- Current time: {CURRENT_TIME}
- Preferred language: {locale}

You are a helpful assistant. Reference information gathered for the \
user's question is listed below. Prefer it over your own recollection \
when they conflict; if it is insufficient, say so rather than invent \
details.

## The user's question

{user_query}

## Recalled memories

{memory_info}

## Retrieval results

{retrieved_information}";

const UPDATE_MEMORY_PROMPT: &str = "\
- Current time: {CURRENT_TIME}
- Preferred language: {locale}

An interaction just completed. Decide whether it produced durable \
knowledge worth remembering for future conversations.

## The user's question

{user_query}

## The answer given

{answer}

## Memories already stored

{memory_info}

If the answer contains a reusable, self-contained fact that is not \
already covered by a stored memory, reply with a distilled summary of \
that fact (a few sentences at most). Otherwise reply with exactly \
`NO_UPDATE`.";

/// Variables substituted into a template. Fields irrelevant to a given
/// template are simply ignored.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub user_query: &'a str,
    pub memory_info: &'a [MemoryFields],
    pub retrieved_information: &'a [String],
    pub task_description: &'a [String],
    pub answer: &'a str,
    pub locale: &'a str,
}

/// Renders a named template into a system turn.
pub fn render(template: Template, vars: &TemplateVars<'_>) -> ChatTurn {
    let raw = match template {
        Template::Route => ROUTE_PROMPT,
        Template::GeneralAnswer => GENERAL_ANSWER_PROMPT,
        Template::GetMemory => GET_MEMORY_PROMPT,
        Template::Supervisor => SUPERVISOR_PROMPT,
        Template::Answer => ANSWER_PROMPT,
        Template::UpdateMemory => UPDATE_MEMORY_PROMPT,
    };

    let current_time = Local::now().format("%a %b %d %Y %H:%M:%S %z").to_string();
    let locale = if vars.locale.is_empty() {
        "en-US"
    } else {
        vars.locale
    };

    let rendered = raw
        .replace("{CURRENT_TIME}", &current_time)
        .replace("{locale}", locale)
        .replace("{user_query}", vars.user_query)
        .replace("{memory_info}", &format_memory_info(vars.memory_info))
        .replace(
            "{retrieved_information}",
            &format_numbered(vars.retrieved_information),
        )
        .replace("{task_description}", &format_numbered(vars.task_description))
        .replace("{answer}", vars.answer);

    ChatTurn::system(rendered)
}

/// Formats recalled memories as Q/A blocks.
pub fn format_memory_info(items: &[MemoryFields]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|m| format!("**Q**: {}\n**A**: {}", m.question, m.answer))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn format_numbered(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;

    #[test]
    fn route_template_substitutes_query_and_time() {
        let vars = TemplateVars {
            user_query: "What is an ETF?",
            ..Default::default()
        };
        let turn = render(Template::Route, &vars);
        assert_eq!(turn.role, Role::System);
        assert!(turn.content.contains("What is an ETF?"));
        assert!(!turn.content.contains("{user_query}"));
        assert!(!turn.content.contains("{CURRENT_TIME}"));
    }

    #[test]
    fn supervisor_template_lists_accumulated_evidence() {
        let memories = vec![MemoryFields {
            question: "old q".into(),
            answer: "old a".into(),
        }];
        let retrieved = vec!["first result".to_string()];
        let tasks = vec!["define ETF".to_string()];
        let vars = TemplateVars {
            user_query: "q",
            memory_info: &memories,
            retrieved_information: &retrieved,
            task_description: &tasks,
            ..Default::default()
        };

        let turn = render(Template::Supervisor, &vars);
        assert!(turn.content.contains("**Q**: old q"));
        assert!(turn.content.contains("1. first result"));
        assert!(turn.content.contains("1. define ETF"));
        assert!(turn.content.contains("needs_more_info"));
    }

    #[test]
    fn empty_collections_render_as_none() {
        assert_eq!(format_memory_info(&[]), "(none)");
        let vars = TemplateVars {
            user_query: "q",
            ..Default::default()
        };
        let turn = render(Template::Answer, &vars);
        assert!(turn.content.contains("(none)"));
    }

    #[test]
    fn update_memory_template_carries_the_sentinel() {
        let vars = TemplateVars {
            user_query: "q",
            answer: "a",
            ..Default::default()
        };
        let turn = render(Template::UpdateMemory, &vars);
        assert!(turn.content.contains(NO_UPDATE_SENTINEL));
        assert!(turn.content.contains("## The answer given\n\na"));
    }
}
