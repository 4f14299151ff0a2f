mod summarizer;

pub use summarizer::{
    trim_incomplete_sentence, Summarizer, DEFAULT_MODEL, DEFAULT_PROMPT, OPENAI_API_URL,
    SUMMARY_TIMEOUT,
};
