//! HTML match-log rendering (SPEC_FULL §4.M): the substitution contract
//! for the external log template named in spec.md §6/§1.

/// One completed match, ready to be rendered into the HTML template.
pub struct MatchLog {
    pub name: String,
    pub comments: String,
    pub result: String,
    pub turns: u32,
}

/// Replaces the five placeholders in `template` with the fields of `log`.
/// Unknown placeholders are left untouched; this performs exactly the
/// substitutions spec.md §6 names, nothing more.
pub fn render(template: &str, log: &MatchLog) -> String {
    template
        .replace("<!--NAME-->", &log.name)
        .replace("<!--GAME NAME-->", &log.name)
        .replace("<!--COMMENTS-->", &log.comments)
        .replace("<!--RESULT-->", &log.result)
        .replace("<!--TURNS-->", &log.turns.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_five_placeholders() {
        let template = "<html><!--NAME--> / <!--GAME NAME--> \
                         <!--COMMENTS--> <!--RESULT--> <!--TURNS--></html>";
        let log = MatchLog {
            name: "alice_vs_bob_1".to_string(),
            comments: "clean win".to_string(),
            result: "first-wins".to_string(),
            turns: 14,
        };
        let rendered = render(template, &log);
        assert!(rendered.contains("alice_vs_bob_1"));
        assert!(rendered.contains("clean win"));
        assert!(rendered.contains("first-wins"));
        assert!(rendered.contains("14"));
        assert!(!rendered.contains("<!--"));
    }
}
