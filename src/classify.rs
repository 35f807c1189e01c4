//! Instruction text classification.
//!
//! The generator answers either with a standardized control literal or with a
//! free-form directive. Coordinate lookup, completion checking, and step
//! descriptions all key off this classification, so the literal sets live
//! here as data tables rather than scattered comparisons. The generator is
//! prompted in English but answers in Russian, so every table carries both
//! languages.

/// Semantic subtype of an instruction, inferred from its literal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    /// A bare URL the user should navigate to.
    Link,
    /// The goal is complete.
    Done,
    /// The screen is expected to change on its own; hold.
    Wait,
    ScrollDown,
    ScrollUp,
    /// An ordinary directive, e.g. "Click the blue Save button".
    FreeForm,
}

impl InstructionKind {
    /// Free-form directives are the only ones worth a coordinate lookup.
    pub fn wants_coordinates(self) -> bool {
        matches!(self, Self::FreeForm)
    }
}

/// Literals meaning "the goal is complete", lowercase.
const DONE_LITERALS: &[&str] = &["done", "готово", "завершено"];

/// Literals meaning "hold until the screen settles", lowercase.
const WAIT_LITERALS: &[&str] = &["wait", "подожди", "подождите", "ждите", "ожидайте"];

/// Classify trimmed, case-folded instruction text.
pub fn classify(text: &str) -> InstructionKind {
    let text = text.trim().to_lowercase();
    if text.starts_with("https://") {
        return InstructionKind::Link;
    }
    if matches_literal(&text, DONE_LITERALS) {
        return InstructionKind::Done;
    }
    if matches_literal(&text, WAIT_LITERALS) {
        return InstructionKind::Wait;
    }
    if text.starts_with("scroll down") || localized_scroll(&text, "вниз") {
        return InstructionKind::ScrollDown;
    }
    if text.starts_with("scroll up") || localized_scroll(&text, "вверх") {
        return InstructionKind::ScrollUp;
    }
    InstructionKind::FreeForm
}

/// Exact match against a literal table, allowing an optional trailing period.
fn matches_literal(text: &str, table: &[&str]) -> bool {
    table
        .iter()
        .any(|lit| text == *lit || text.strip_suffix('.') == Some(lit))
}

fn localized_scroll(text: &str, direction: &str) -> bool {
    text.contains("прокрут") && text.contains(direction)
}

/// Human-readable description of a step, as handed to the completion checker.
///
/// Control literals get a stable phrasing; free-form text passes through.
pub fn step_description(text: &str) -> String {
    match classify(text) {
        InstructionKind::Link => format!("Перейдите по адресу {text}"),
        InstructionKind::Wait => "Подождите, пока окно загрузится".to_string(),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_link() {
        assert_eq!(classify("https://figma.com"), InstructionKind::Link);
    }

    #[test]
    fn done_literals_in_both_languages() {
        assert_eq!(classify("Done."), InstructionKind::Done);
        assert_eq!(classify("done"), InstructionKind::Done);
        assert_eq!(classify("ЗАВЕРШЕНО"), InstructionKind::Done);
        assert_eq!(classify("Готово."), InstructionKind::Done);
    }

    #[test]
    fn wait_literals_in_both_languages() {
        assert_eq!(classify("Wait"), InstructionKind::Wait);
        assert_eq!(classify("wait."), InstructionKind::Wait);
        assert_eq!(classify("Подождите"), InstructionKind::Wait);
        assert_eq!(classify("ожидайте."), InstructionKind::Wait);
    }

    #[test]
    fn scroll_prefixes() {
        assert_eq!(classify("Scroll Down please"), InstructionKind::ScrollDown);
        assert_eq!(classify("scroll up"), InstructionKind::ScrollUp);
        assert_eq!(
            classify("Прокрутите страницу вниз"),
            InstructionKind::ScrollDown
        );
        assert_eq!(classify("Прокрутите вверх"), InstructionKind::ScrollUp);
    }

    #[test]
    fn everything_else_is_free_form() {
        assert_eq!(classify("Click Save"), InstructionKind::FreeForm);
        assert_eq!(classify("Нажмите кнопку «Сохранить»"), InstructionKind::FreeForm);
        // A period only excuses literals, not prefixes.
        assert_eq!(classify("donezo"), InstructionKind::FreeForm);
    }

    #[test]
    fn descriptions_for_checker() {
        assert_eq!(
            step_description("https://figma.com"),
            "Перейдите по адресу https://figma.com"
        );
        assert_eq!(step_description("Wait"), "Подождите, пока окно загрузится");
        assert_eq!(step_description("Click Save"), "Click Save");
    }
}
