pub mod models;

pub use models::{Comment, Cursor, NewComment, NewPost, Post, PostQuery, Reaction, Visibility};
