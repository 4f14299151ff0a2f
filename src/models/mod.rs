mod article;
mod item;
mod source;

pub use article::{Article, NewArticle};
pub use item::Item;
pub use source::{NewSource, Source};
