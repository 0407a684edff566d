// Restoration provider adapters
//
// - GeminiProvider: image-to-image restoration through Gemini generateContent
// - PassthroughProvider: returns the original reference (opt-in fallback)
// - ScriptedProvider: replays a scripted sequence of outcomes (tests)

pub mod driver;
pub mod fake;
pub mod passthrough;
pub mod types;

#[cfg(test)]
mod tests;

pub use driver::GeminiProvider;
pub use fake::ScriptedProvider;
pub use passthrough::PassthroughProvider;
