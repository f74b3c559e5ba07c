//! services/api/src/worker/chunk.rs
//!
//! Splits a transcript into ordered chunks small enough for per-request
//! vendor limits. Chunk order is load-bearing: translation and synthesis
//! both run per chunk, and the final audio is concatenated in chunk order.

/// A helper function to split a block of text into sentences.
fn split_into_sentences(text: &str) -> Vec<String> {
    text.split(|c: char| c == '.' || c == '?' || c == '!')
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("{}.", s.trim()))
        .collect()
}

/// Splits a transcript at sentence boundaries into chunks of at most
/// `max_chars` characters, preserving original sentence order.
///
/// A single sentence longer than `max_chars` is split at whitespace as a
/// fallback so no chunk ever exceeds the vendor limit.
pub fn chunk_transcript(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_into_sentences(text) {
        if sentence.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_long_sentence(&sentence, max_chars));
            continue;
        }
        let needed = sentence.chars().count() + if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + needed > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let needed = word.chars().count() + if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + needed > max_chars && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_transcript_is_one_chunk() {
        let chunks = chunk_transcript("Hello there. How are you?", 100);
        assert_eq!(chunks, vec!["Hello there. How are you."]);
    }

    #[test]
    fn chunks_respect_the_character_limit() {
        let text = "One two three. Four five six. Seven eight nine. Ten eleven twelve.";
        let chunks = chunk_transcript(text, 35);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 35, "over limit: {chunk:?}");
        }
    }

    #[test]
    fn reassembled_chunks_preserve_sentence_order() {
        let text = "Alpha first. Bravo second. Charlie third. Delta fourth. Echo fifth.";
        let chunks = chunk_transcript(text, 30);
        let joined = chunks.join(" ");
        let mut last = 0;
        for word in ["Alpha", "Bravo", "Charlie", "Delta", "Echo"] {
            let pos = joined.find(word).expect("word missing after chunking");
            assert!(pos >= last, "{word} appeared out of order");
            last = pos;
        }
    }

    #[test]
    fn oversized_sentence_is_split_at_whitespace() {
        let text = "this single sentence has far too many words to fit in one tiny chunk";
        let chunks = chunk_transcript(text, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 20);
        }
    }

    #[test]
    fn empty_and_punctuation_only_input_yields_no_chunks() {
        assert!(chunk_transcript("", 100).is_empty());
        assert!(chunk_transcript("...!!!", 100).is_empty());
    }
}
