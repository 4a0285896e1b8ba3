pub mod attempt;
pub mod catalog;
pub mod certificate;
pub mod evaluation;
pub mod exercise;
pub mod lesson;
pub mod progress;
pub mod ranking;
