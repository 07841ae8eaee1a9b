pub mod embeds;
pub mod panel;
