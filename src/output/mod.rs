/// Cache-key masking of validated queries.
pub mod masker;
/// Rendering of the verified tree back to SQL text.
pub mod serializer;
