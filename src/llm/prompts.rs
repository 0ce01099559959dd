use serde_json::Value;

/// Instruction used by observe when the caller supplies none.
pub const DEFAULT_OBSERVE_INSTRUCTION: &str = "Find elements that can be used for any future actions in the page. These may be navigation links, related pages, section/subsection links, buttons, or other interactive elements. Be comprehensive: if there are multiple elements that may be relevant for future actions, return all of them.";

/// DOM text sent in place of the serialization when a screenshot is attached.
pub const VISION_DOM_PLACEHOLDER: &str = "n/a. use the image to find the elements.";

fn build_user_instructions_string(user_instructions: Option<&str>) -> Option<String> {
    let instructions = user_instructions?.trim();
    if instructions.is_empty() {
        return None;
    }

    Some(format!(
        "\n\n# Custom Instructions Provided by the User\n\nPlease keep the user's instructions in mind when performing actions. If the user's instructions are not relevant to the current task, ignore them.\n\nUser Instructions:\n{instructions}"
    ))
}

fn with_user_instructions(base: String, user_instructions: Option<&str>) -> String {
    match build_user_instructions_string(user_instructions) {
        Some(extra) => format!("{base}{extra}"),
        None => base,
    }
}

pub fn build_extract_system_prompt(user_instructions: Option<&str>) -> String {
    let base = [
        "You are extracting content on behalf of a user.\nIf a user asks you to extract a 'list' of information, or 'all' information,\nYOU MUST EXTRACT ALL OF THE INFORMATION THAT THE USER REQUESTS.\n\nYou will be given:\n1. An instruction\n2. Progress made so far and the content already extracted\n3. A numbered list of DOM elements from one section of the page",
        "Print the exact text from the DOM elements with all symbols, characters, and endlines as is.\nPrint null or an empty string if no new information is found.",
        "Keep everything that was already extracted and add what this section contributes.",
        "Respond with JSON: your entire reply must be valid JSON that matches the requested schema.",
    ]
    .join("\n\n");

    with_user_instructions(base, user_instructions)
}

/// User turn for one extraction round; `previously_extracted` is rendered as JSON.
pub fn build_extract_user_prompt(
    instruction: &str,
    progress: &str,
    previously_extracted: &Value,
    dom_elements: &str,
) -> String {
    let progress = if progress.trim().is_empty() {
        "none yet"
    } else {
        progress
    };
    format!(
        "Instruction: {instruction}\nProgress: {progress}\nPreviously extracted content: {previously_extracted}\nDOM: {dom_elements}"
    )
}

pub fn build_metadata_system_prompt() -> String {
    "You are an AI assistant tasked with evaluating the progress and completion status of an extraction task.\nAnalyze the extraction response and determine if the task is completed or if more information is needed.\n\nStrictly abide by the following criteria:\n1. Once the instruction has been satisfied by the current extraction response, ALWAYS set completion status to true and stop processing, regardless of remaining chunks.\n2. Only set completion status to false if BOTH of these conditions are true:\n   - The instruction has not been satisfied yet\n   - There are still chunks left to process (chunksTotal > chunksSeen)\n\nRespond with JSON containing `progress` (a short summary of what has been extracted so far) and `completed` (a boolean).".to_string()
}

/// `chunks_seen` counts the section just processed.
pub fn build_metadata_prompt(
    instruction: &str,
    extracted: &Value,
    chunks_seen: usize,
    chunks_total: usize,
) -> String {
    format!(
        "Instruction: {instruction}\nExtracted content: {extracted}\nchunksSeen: {chunks_seen}\nchunksTotal: {chunks_total}"
    )
}

pub fn build_observe_system_prompt(use_vision: bool, user_instructions: Option<&str>) -> String {
    let given = if use_vision {
        "an annotated screenshot of the page where every candidate element is outlined and labelled with its numeric id"
    } else {
        "a numbered list of possible elements, one per line as `id:element`"
    };
    let base = format!(
        "You are helping the user automate the browser by finding elements based on what the user wants to observe in the page.\n\nYou will be given:\n1. an instruction of elements to observe\n2. {given}\n\nReturn an array of elements that match the instruction if they exist, otherwise return an empty array.\n\nRespond with JSON: always return a JSON object with an `elements` array. Each element must be an object with keys `elementId` (the numeric id of the element), `description` (a short natural language summary), and optionally `method` and `arguments` (an array of strings) suggesting an action for the element."
    );

    with_user_instructions(base, user_instructions)
}

pub fn build_observe_user_message(instruction: &str, dom_elements: &str) -> String {
    format!("instruction: {instruction}\nDOM: {dom_elements}")
}

pub fn effective_observe_instruction(user_instruction: Option<&str>) -> &str {
    match user_instruction {
        Some(value) if !value.trim().is_empty() => value,
        _ => DEFAULT_OBSERVE_INSTRUCTION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_instruction_falls_back_to_default() {
        assert_eq!(effective_observe_instruction(None), DEFAULT_OBSERVE_INSTRUCTION);
        assert_eq!(
            effective_observe_instruction(Some("   ")),
            DEFAULT_OBSERVE_INSTRUCTION
        );
        assert_eq!(effective_observe_instruction(Some("find links")), "find links");
    }

    #[test]
    fn extract_user_prompt_carries_prior_content() {
        let prompt = build_extract_user_prompt(
            "get titles",
            "",
            &json!({ "titles": ["a"] }),
            "0:<h1>a</h1>",
        );
        assert!(prompt.contains("Progress: none yet"));
        assert!(prompt.contains(r#"{"titles":["a"]}"#));
        assert!(prompt.ends_with("DOM: 0:<h1>a</h1>"));
    }

    #[test]
    fn custom_instructions_are_appended() {
        let prompt = build_extract_system_prompt(Some("prefer ISO dates"));
        assert!(prompt.contains("User Instructions:\nprefer ISO dates"));
        assert!(!build_extract_system_prompt(Some("  ")).contains("User Instructions"));
    }

    #[test]
    fn observe_prompt_mentions_screenshot_only_with_vision() {
        assert!(build_observe_system_prompt(true, None).contains("annotated screenshot"));
        assert!(!build_observe_system_prompt(false, None).contains("annotated screenshot"));
    }
}
