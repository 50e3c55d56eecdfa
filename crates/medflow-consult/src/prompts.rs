//! Prompt builders for the consultation and memory pipelines.
//!
//! Instructions are in English; user-facing output is Vietnamese. Every
//! prompt pins the response to a fenced JSON block with a fixed schema so
//! `parse` can validate required fields and allowed value sets.

use medflow_core::types::{Candidate, KbEntry, MemoryEntry, Role};

/// Fixed reply when composition produced unusable output.
pub const GENERIC_ANSWER: &str =
    "Xin lỗi, tôi không thể tạo câu trả lời phù hợp lúc này. Bạn đặt câu hỏi khác được không?";

/// Fixed reply of the overload fallback leaf.
pub const FALLBACK_ANSWER: &str =
    "Hệ thống đang quá tải, tôi chưa thể trả lời chi tiết. Bạn vui lòng thử lại sau ít phút nhé.";

/// Fixed reply when retrieval keeps coming back empty.
pub const CLARIFY_ANSWER: &str =
    "Mình chưa tìm thấy thông tin phù hợp trong cơ sở tri thức. Bạn có thể mô tả rõ hơn vấn đề \
     của mình được không?";

pub fn classify(query: &str, role: Role, history: &str) -> String {
    let history_block = if history.is_empty() {
        String::new()
    } else {
        format!("Recent conversation:\n{history}\n\n")
    };
    format!(
        "You are a medical assistant bot. The user is: {role_name}.\n\n\
         {history_block}Current user input: \"{query}\"\n\n\
         Pick exactly one action:\n\
         - direct_response: greet, chat, or ask what medical help is needed; also when the \
         conversation already contains the answer.\n\
         - retrieve_kb: forward to the knowledge-base agent for a grounded medical answer.\n\n\
         Answer in Vietnamese. Reply with ONLY a JSON block.\n\n\
         For direct_response:\n\
         ```json\n\
         {{\"type\": \"direct_response\", \"explanation\": \"<your reply to the user>\"}}\n\
         ```\n\n\
         For retrieve_kb (the retrieval agent cannot see the chat history, so summarize it and \
         rewrite the query only if it is ambiguous):\n\
         ```json\n\
         {{\"type\": \"retrieve_kb\", \"context_summary\": \"<short summary>\", \
         \"new_query\": \"<clarified query or empty>\"}}\n\
         ```",
        role_name = role.display_name(),
    )
}

pub fn rewrite_query(
    query: &str,
    role: Role,
    context_summary: &str,
    category: Option<&str>,
) -> String {
    let topic = category
        .map(|c| format!("\nIdentified topic: \"{c}\""))
        .unwrap_or_default();
    format!(
        "Context:\n\
         - Conversation summary: {context_summary}\n\
         - Current user question: \"{query}\"\n\
         - The user is: {role_name}{topic}\n\n\
         Task: rewrite the question into a clear, self-contained Vietnamese query for a vector \
         database search.\n\n\
         Reply with ONLY a JSON block:\n\
         ```json\n\
         {{\"retrieval_query\": \"<rewritten query>\", \"reason\": \"<short reason>\", \
         \"confidence\": \"high|medium|low\"}}\n\
         ```",
        role_name = role.display_name(),
    )
}

pub fn filter_candidates(query: &str, candidates: &[Candidate], max_selected: usize) -> String {
    let listing = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. id={}: \"{}\"", i + 1, c.id, truncate(&c.question, 100)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Select at most {max_selected} questions most relevant to answering the user.\n\n\
         User: \"{query}\"\n\n\
         Candidates:\n{listing}\n\n\
         Reply with ONLY a JSON block:\n\
         ```json\n\
         {{\"selected_ids\": [\"...\"]}}\n\
         ```"
    )
}

pub fn next_action(
    query: &str,
    selected_questions: &[String],
    attempts: u32,
    cap: u32,
) -> String {
    let questions = if selected_questions.is_empty() {
        "(none)".to_string()
    } else {
        selected_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, truncate(q, 80)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You orchestrate a retrieval pipeline. Decide the next step.\n\n\
         Query: \"{query}\"\n\
         Retrieval passes used: {attempts}/{cap}\n\
         Filtered questions:\n{questions}\n\n\
         Actions:\n\
         - retry_retrieve: run retrieval again with a fresh pass\n\
         - compose_answer: enough material, compose the reply\n\n\
         Rules:\n\
         1. attempts >= {cap} forces compose_answer.\n\
         2. Two or more good questions: compose_answer.\n\n\
         Reply with ONLY a JSON block:\n\
         ```json\n\
         {{\"next_action\": \"retry_retrieve|compose_answer\", \"reason\": \"...\"}}\n\
         ```"
    )
}

pub fn compose_answer(query: &str, role: Role, entries: &[KbEntry], history: &str) -> String {
    let kb_block = if entries.is_empty() {
        "No knowledge-base material available.".to_string()
    } else {
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. Q: {}\n   A: {}", i + 1, e.question, e.answer))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let history_block = if history.is_empty() {
        "No prior conversation.".to_string()
    } else {
        history.to_string()
    };
    format!(
        "You answer as a doctor speaking to {audience}. Tone: {tone}.\n\n\
         User question: \"{query}\"\n\n\
         Verified knowledge-base material:\n{kb_block}\n\n\
         Conversation history:\n{history_block}\n\n\
         Compose a Vietnamese answer grounded in the material above, then suggest up to 3 \
         short follow-up questions the user might ask next.\n\n\
         Reply with ONLY a JSON block:\n\
         ```json\n\
         {{\"explanation\": \"<answer>\", \"suggestion_questions\": [\"...\"]}}\n\
         ```",
        audience = role.audience(),
        tone = role.tone(),
    )
}

pub fn plan_mutations(
    query: &str,
    role: Role,
    context_summary: &str,
    answer_text: &str,
    memories: &[MemoryEntry],
) -> String {
    let memory_block = if memories.is_empty() {
        "Existing memories: none.".to_string()
    } else {
        let listing = memories
            .iter()
            .map(|m| format!("- id: {}\n  content: {}\n  score: {:.3}", m.id, m.content, m.score))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Existing memories (top {}):\n{listing}", memories.len())
    };
    format!(
        "You manage long-term memories about a user. Analyze the exchange and decide which \
         operations to perform.\n\n\
         Conversation summary: {context_summary}\n\
         User ({role_name}): \"{query}\"\n\
         Assistant replied: \"{answer}\"\n\
         {memory_block}\n\n\
         Operations:\n\
         - insert: genuinely new, durable personal facts (name, age, conditions, preferences)\n\
         - update: an existing memory whose content changed — reference its id\n\
         - delete: an existing memory that is wrong or explicitly denied — reference its id\n\
         - none of the above for small talk or general knowledge\n\n\
         Reply with ONLY a JSON block (Vietnamese memory content):\n\
         ```json\n\
         {{\n\
           \"insert_operations\": [{{\"content\": \"...\"}}],\n\
           \"update_operations\": [{{\"memory_id\": \"...\", \"content\": \"...\"}}],\n\
           \"delete_operations\": [{{\"memory_id\": \"...\"}}],\n\
           \"reason\": \"...\",\n\
           \"importance\": \"low|medium|high\"\n\
         }}\n\
         ```",
        role_name = role.display_name(),
        answer = truncate(answer_text, 300),
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
