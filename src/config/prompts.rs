//! Prompt text for the study coach
//!
//! The chat system instruction can be replaced from the config file
//! (`[chat] system_instruction`); everything else is built in.

/// Built-in prompts and fallback texts
pub mod builtin {
    /// System instruction for every chat session
    pub const SYSTEM_INSTRUCTION: &str = r#"You are a friendly, encouraging, and highly intelligent AI study coach for students.
Your goal is to help them learn, organize their life, and stay motivated.

Rules:
1. Be friendly and supportive. Use emojis occasionally.
2. Do NOT provide direct answers to homework questions if it looks like cheating. Instead, explain the concept step-by-step and guide the user to the answer.
3. If the user asks for a summary, flashcards, or quiz, generate them in a structured format.
4. Reference the user's uploaded notes if context is provided.
5. Never hallucinate facts. If you don't know, admit it.
6. Offer specific "suggested actions" like "Create Flashcards" or "Add to Study Plan" when relevant."#;

    /// First message of a new conversation
    pub const GREETING: &str =
        "Hi there! I'm your AI study coach. Upload your notes or ask me anything to get started! 🚀";

    /// Reply appended when a turn fails
    pub const STREAM_ERROR: &str =
        "Sorry, I encountered an error connecting to the brain. Please try again.";

    pub const SUMMARY_EMPTY: &str = "Could not generate summary.";
    pub const SUMMARY_FAILED: &str = "Failed to generate summary.";

    pub const MOTIVATION_PROMPT: &str = "Give me a short, powerful, modern motivational quote for a student in English. Include the author if known. Just return the quote text.";
    pub const MOTIVATION_EMPTY: &str = "Keep pushing forward! 🚀";
    pub const MOTIVATION_FAILED: &str = "You are capable of amazing things.";

    pub fn summary_prompt(notes: &str) -> String {
        format!(
            "Summarize the following study notes into concise, easy-to-read bullet points in English. \
             Highlight key terms. Context: {}",
            notes
        )
    }

    pub fn flashcards_prompt(topic: &str, context: &str) -> String {
        format!(
            "Generate 5-10 high-quality flashcards for the topic: \"{}\".\n\
             Context: {}.\n\
             IMPORTANT: Ensure the content (front and back) is written in English, \
             even if the context provided is in another language.",
            topic, context
        )
    }

    pub fn study_plan_prompt(goals: &str) -> String {
        format!(
            "Create a realistic study schedule for today based on these goals: \"{}\".\n\
             Assume the student has about 4-6 hours available. Include breaks. Output in English.",
            goals
        )
    }
}
