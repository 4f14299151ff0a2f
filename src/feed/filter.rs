use crate::models::Item;

/// Drops items whose title or categories match a configured keyword.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .filter(|k| !k.as_ref().trim().is_empty())
            .map(|k| k.as_ref().to_lowercase())
            .collect();
        Self { keywords }
    }

    /// True when the title contains a keyword or a category equals one,
    /// both ignoring case.
    pub fn should_skip(&self, item: &Item) -> bool {
        if self.keywords.is_empty() {
            return false;
        }

        let title = item.title.to_lowercase();

        self.keywords.iter().any(|keyword| {
            title.contains(keyword.as_str())
                || item
                    .categories
                    .iter()
                    .any(|category| category.to_lowercase() == *keyword)
        })
    }
}
