//! Core subsystems: LLM stream proxying, sentence segmentation, and the
//! single-flight TTS synthesis pipeline (fingerprint → cache → dispatcher →
//! backend pool).

pub mod llm;
pub mod segment;
pub mod tts;
