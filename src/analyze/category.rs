//! Topic keyword → category table. First match in table order wins.

use crate::model::GENERAL_CATEGORY;

/// Ordered; earlier rows take precedence.
pub const CATEGORY_TABLE: &[(&str, &str)] = &[
    ("politic", "Politics"),
    ("government", "Politics"),
    ("election", "Politics"),
    ("technology", "Technology"),
    ("tech", "Technology"),
    ("science", "Science"),
    ("research", "Science"),
    ("business", "Business"),
    ("economy", "Business"),
    ("finance", "Business"),
    ("sport", "Sports"),
    ("gaming", "Entertainment"),
    ("movie", "Entertainment"),
    ("film", "Entertainment"),
    ("entertain", "Entertainment"),
    ("health", "Health"),
    ("medical", "Health"),
    ("environment", "Environment"),
    ("climate", "Environment"),
    ("culture", "Culture"),
    ("arts", "Culture"),
    ("education", "Education"),
    ("world", "World News"),
    ("war", "World News"),
    ("conflict", "World News"),
];

/// Category for a list of topics, or `None` when no table key occurs in any topic.
pub fn infer_category(topics: &[String]) -> Option<&'static str> {
    let lowered: Vec<String> = topics.iter().map(|t| t.to_lowercase()).collect();
    CATEGORY_TABLE
        .iter()
        .find(|(key, _)| lowered.iter().any(|t| t.contains(key)))
        .map(|(_, cat)| *cat)
}

pub fn infer_category_or_general(topics: &[String]) -> &'static str {
    infer_category(topics).unwrap_or(GENERAL_CATEGORY)
}
