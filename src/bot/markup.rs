/// Characters Telegram's MarkdownV2 treats as markup.
const SPECIAL_CHARS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

/// Escape `src` so it renders literally in a MarkdownV2 message.
pub fn escape_markdown(src: &str) -> String {
    let mut escaped = String::with_capacity(src.len());
    for c in src.chars() {
        if SPECIAL_CHARS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
