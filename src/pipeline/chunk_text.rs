//! Character-based sliding-window chunking with word-boundary-aware overlap.
//! `chunk_size`/`chunk_overlap` are raw character counts here (the pipeline's
//! config units), unlike the teacher's token-based chunker.

pub fn split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let find_char_boundary = |byte_pos: usize| -> usize {
        if byte_pos >= text.len() {
            return text.len();
        }
        if text.is_char_boundary(byte_pos) {
            return byte_pos;
        }
        (0..byte_pos).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
    };

    let mut chunks = Vec::new();
    let mut start_byte = 0;

    while start_byte < text.len() {
        start_byte = find_char_boundary(start_byte);
        let end_byte = find_char_boundary((start_byte + chunk_size).min(text.len()));

        let chunk_end_byte = if end_byte < text.len() {
            let search_start_byte = find_char_boundary(end_byte.saturating_sub(chunk_size / 5));
            text.get(search_start_byte..end_byte)
                .and_then(|window| {
                    window
                        .char_indices()
                        .rev()
                        .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                        .map(|(offset, _)| find_char_boundary(search_start_byte + offset + 1))
                })
                .unwrap_or(end_byte)
        } else {
            end_byte
        };

        if let Some(chunk) = text.get(start_byte..chunk_end_byte) {
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        }

        if chunk_end_byte >= text.len() {
            break;
        }

        let new_start_byte = find_char_boundary(chunk_end_byte.saturating_sub(chunk_overlap));
        start_byte = if new_start_byte >= chunk_end_byte { chunk_end_byte } else { new_start_byte };
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_empty_text() {
        assert!(split("", 200, 20).is_empty());
    }

    #[test]
    fn test_split_short_text_is_one_chunk() {
        let chunks = split("hello world", 200, 20);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn test_split_long_text_produces_overlap() {
        let text = "word ".repeat(200);
        let chunks = split(&text, 200, 20);
        assert!(chunks.len() >= 2);
    }
}
