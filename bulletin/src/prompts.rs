//! Prompt templates for classification and summaries.
//!
//! Templates use `{{KEY}}` placeholders; [`render`] fills them and [`unresolved_placeholders`]
//! reports anything left behind.

use std::collections::HashMap;

use regex::Regex;

use crate::model::Category;

pub const CLASSIFICATION_SYSTEM: &str = r#"Eres un clasificador experto de noticias de Ecuador.

Asigna cada noticia a UNA sola de estas categorías, la más relevante:
- economia: comercio, finanzas, empleo, inversión, precios, banca, mercados.
- politica: gobierno, Asamblea, elecciones, leyes, decretos, funcionarios.
- sociedad: educación, salud, cultura, deportes, migración, comunidades.
- seguridad: delincuencia, operativos policiales, cárceles, crimen organizado.
- internacional: relaciones exteriores, diplomacia, hechos en otros países.
- vial: accidentes de tránsito, carreteras, obras viales, transporte público.

Responde únicamente con un objeto JSON válido, sin texto adicional."#;

pub const CLASSIFICATION_USER: &str = r#"Clasifica las siguientes noticias.

NOTICIAS:
{{NEWS_DATA}}

Devuelve un objeto JSON con exactamente estas claves, cada una con un array (vacío si no hay noticias):
{"economia": [], "politica": [], "sociedad": [], "seguridad": [], "internacional": [], "vial": []}

Cada noticia clasificada debe conservar "title", "content", "url" y "source" tal como llegaron,
e incluir "imageUrl" cuando la noticia original lo tenga. Clasifica TODAS las noticias."#;

pub const SUMMARY_SYSTEM: &str = r#"Eres editor de un boletín diario de noticias de Ecuador.
Escribes resúmenes claros, objetivos y en tiempo presente, sin opiniones ni sensacionalismo.
Empiezas por la idea principal y cierras con datos concretos: cifras, fechas, lugares."#;

pub const SUMMARY_USER: &str = r#"Resume las noticias de la categoría {{CATEGORY}}.

NOTICIAS:
{{CLASSIFIED_NEWS}}

REQUISITOS:
- Máximo {{MAX_WORDS}} palabras
- Un solo párrafo que combine todas las noticias
- Sin viñetas ni listas, sin mencionar las fuentes

{{EXAMPLE_OUTPUT}}

Responde solo con el texto del resumen."#;

/// Replace every `{{KEY}}` with its value. Unknown keys are left untouched.
pub fn render(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{{{}}}}}", key), value);
    }
    out
}

/// Placeholders still present after rendering.
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    match Regex::new(r"\{\{[A-Z_]+\}\}") {
        Ok(re) => re.find_iter(text).map(|m| m.as_str().to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn classification_prompt(news_data: &str) -> String {
    let mut values = HashMap::new();
    values.insert("NEWS_DATA", news_data.to_string());
    render(CLASSIFICATION_USER, &values)
}

pub fn summary_prompt(
    category: Category,
    classified_news: &str,
    max_words: usize,
    example_output: Option<&str>,
) -> String {
    let example = example_output
        .filter(|e| !e.trim().is_empty())
        .map(|e| format!("EJEMPLO DE SALIDA:\n{}", e.trim()))
        .unwrap_or_default();

    let mut values = HashMap::new();
    values.insert("CATEGORY", category.display_name().to_string());
    values.insert("CLASSIFIED_NEWS", classified_news.to_string());
    values.insert("MAX_WORDS", max_words.to_string());
    values.insert("EXAMPLE_OUTPUT", example);
    render(SUMMARY_USER, &values)
}
