//! Prompt and excerpt formatting for retrieved statute passages.

use crate::collection::{Document, SearchResult, Value};

const UNKNOWN_SOURCE: &str = "Fonte desconhecida";

const HEADER: &str = "Você é um assistente jurídico. Responda APENAS com base nos trechos das normas \
abaixo; não invente leis nem informações. Quando citar, indique 'Fonte: <arquivo>' \
e, se possível, o número/ano.";

const CLOSING: &str = "Responda de forma clara e objetiva. Se não houver informação suficiente no \
contexto, diga que não é possível responder com segurança com base nas normas fornecidas.";

/// Builds the grounded prompt sent to the answering model.
///
/// Each excerpt is numbered in rank order and truncated to `snippet_chars`
/// characters.
pub fn build_prompt(question: &str, hits: &[SearchResult], snippet_chars: usize) -> String {
    let context = if hits.is_empty() {
        "Sem contexto disponível.\n".to_string()
    } else {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "{} - Fonte: {}\n{}\n",
                    reference(i + 1, &hit.document),
                    source_label(&hit.document),
                    snippet(&hit.document.text, snippet_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{}\n\nContexto (trechos relevantes):\n{}\n\nPergunta: {}\n\n{}",
        HEADER, context, question, CLOSING
    )
}

/// Renders the excerpts alone, shown when no answer can be generated.
pub fn format_excerpts(hits: &[SearchResult], snippet_chars: usize) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let document = &hit.document;
            let mut header = format!("[{}] Fonte: {}", i + 1, source_label(document));
            if let Some(citation) = citation(document) {
                header.push(' ');
                header.push_str(&citation);
            }
            format!("{}\n{}", header, snippet(&document.text, snippet_chars))
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Where an excerpt came from: source file, then norm name, then a placeholder.
pub fn source_label(document: &Document) -> String {
    ["source_file", "arquivo", "norma"]
        .iter()
        .find_map(|key| non_empty(document, key))
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

fn reference(position: usize, document: &Document) -> String {
    let mut parts = Vec::new();
    if let Some(norma) = non_empty(document, "norma") {
        parts.push(norma);
    }
    if let Some(citation) = citation(document) {
        parts.push(citation);
    }
    if parts.is_empty() {
        format!("[{}]", position)
    } else {
        format!("[{}] {}", position, parts.join(" | "))
    }
}

/// `numero/ano` when both are present.
fn citation(document: &Document) -> Option<String> {
    let numero = non_empty(document, "numero")?;
    let ano = non_empty(document, "ano")?;
    Some(format!("{}/{}", numero, ano))
}

fn non_empty(document: &Document, key: &str) -> Option<String> {
    let rendered = match document.metadata.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(_) => return None,
    };
    (!rendered.is_empty()).then_some(rendered)
}

/// Truncates to `max_chars` characters, marking the cut with `...`.
fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
