use roster_core::types::Turn;

use crate::grammar::{
    ACTION_INPUT_MARKER, ACTION_MARKER, FINAL_ANSWER_MARKER, OBSERVATION_MARKER, QUESTION_MARKER,
    THOUGHT_MARKER,
};
use crate::tools::ToolSpec;

const PREAMBLE: &str = "\
You are an AI assistant that helps retrieve and provide information about employees from a SQL database.";

const GUIDELINES: &str = "\
IMPORTANT GUIDELINES:
1. First, check what tables are available using the list_tables tool
2. Get the schema for relevant tables using the get_schema tool before writing SQL
3. Formulate a single read-only SELECT query to answer the question
4. Execute the query with run_query and interpret the results
5. If you encounter errors, check the schema again and fix your query
6. If you are unable to get the proper information or think the information is wrong, say so
7. Reference any information from previous parts of our conversation when relevant
8. When referring to people, use their full names on first mention, then you can use first names
9. Be friendly and conversational in your responses, not overly technical
10. Format any numerical values appropriately (currency with $ sign, percentages, etc.)

This database contains information about employees including their:
- name
- department
- position
- contact details (email, phone, address)
- hire date and date of birth
- username";

const NO_HISTORY: &str = "(no previous conversation)";

/// Builds the reasoning-loop prompt.
///
/// The format section is rendered from the same marker constants the parser
/// matches on, so the two cannot drift apart.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    catalog: String,
    tool_names: String,
    history_window: usize,
}

impl PromptComposer {
    pub fn new(tools: &[ToolSpec], history_window: usize) -> Self {
        let catalog = tools
            .iter()
            .map(|tool| format!("{}: {}", tool.name, tool.description))
            .collect::<Vec<_>>()
            .join("\n");
        let tool_names = tools
            .iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            catalog,
            tool_names,
            history_window,
        }
    }

    fn render_history(&self, history: &[Turn]) -> String {
        let start = history.len().saturating_sub(self.history_window);
        let recent = &history[start..];
        if recent.is_empty() {
            return NO_HISTORY.to_string();
        }

        recent
            .iter()
            .map(|turn| format!("{}: {}", turn.role.prompt_label(), turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_format(&self) -> String {
        format!(
            "Use the following format:\n\n\
             {QUESTION_MARKER} the input question you must answer\n\
             {THOUGHT_MARKER} you should always think about what to do\n\
             {ACTION_MARKER} the action to take, should be one of [{tools}]\n\
             {ACTION_INPUT_MARKER} the input to the action\n\
             {OBSERVATION_MARKER} the result of the action\n\
             ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
             {THOUGHT_MARKER} I now know the final answer\n\
             {FINAL_ANSWER_MARKER} the final answer to the original input question",
            tools = self.tool_names
        )
    }

    /// Compose the full prompt for one completion call.
    ///
    /// `scratchpad` holds the model output and observations of the earlier
    /// cycles in this run; it continues directly after the trailing
    /// `Thought: ` marker.
    pub fn compose(&self, history: &[Turn], question: &str, scratchpad: &str) -> String {
        format!(
            "{PREAMBLE}\n\n\
             You have access to the following tools:\n{catalog}\n\n\
             Previous conversation history:\n{history}\n\n\
             {GUIDELINES}\n\n\
             {format}\n\n\
             {QUESTION_MARKER} {question}\n\
             {THOUGHT_MARKER} {scratchpad}",
            catalog = self.catalog,
            history = self.render_history(history),
            format = self.render_format(),
            question = question.trim(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::TOOL_CATALOG;

    fn composer() -> PromptComposer {
        PromptComposer::new(TOOL_CATALOG, 4)
    }

    #[test]
    fn test_prompt_lists_tools_and_format() {
        let prompt = composer().compose(&[], "Who works in Engineering?", "");

        for tool in TOOL_CATALOG {
            assert!(prompt.contains(&format!("{}: {}", tool.name, tool.description)));
        }
        assert!(prompt.contains(
            "Action: the action to take, should be one of [list_tables, get_schema, validate_query, run_query]"
        ));
        assert!(prompt.contains("Final Answer: the final answer to the original input question"));
        assert!(prompt.contains(NO_HISTORY));
        assert!(prompt.ends_with("Question: Who works in Engineering?\nThought: "));
    }

    #[test]
    fn test_history_is_role_tagged_and_windowed() {
        let history = vec![
            Turn::user("q1"),
            Turn::assistant("a1"),
            Turn::user("q2"),
            Turn::assistant("a2"),
            Turn::user("q3"),
            Turn::assistant("a3"),
        ];

        let prompt = composer().compose(&history, "q4", "");

        assert!(!prompt.contains("Human: q1"));
        assert!(!prompt.contains("AI: a1"));
        assert!(prompt.contains("Human: q2\nAI: a2\nHuman: q3\nAI: a3"));
    }

    #[test]
    fn test_scratchpad_follows_final_thought() {
        let scratchpad = "I should list tables\nAction: list_tables\nAction Input: \nObservation: employees\nThought: ";
        let prompt = composer().compose(&[], "How many employees?", scratchpad);

        assert!(prompt.ends_with(&format!("Question: How many employees?\nThought: {scratchpad}")));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let composer = composer();
        assert_eq!(
            composer.compose(&history, "q", "pad"),
            composer.compose(&history, "q", "pad")
        );
    }
}
