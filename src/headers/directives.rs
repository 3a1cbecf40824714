//! Cache-Control style directive lists.
//!
//! Directives keep their original spelling so a list can be filtered and
//! rendered back without reformatting the values the origin chose.

/// One comma-separated directive, e.g. `max-age=60` or `public`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Directive {
    /// Lowercased directive name.
    pub name: String,
    /// Value with surrounding quotes preserved, if any.
    pub value: Option<String>,
}

impl Directive {
    pub fn render(&self) -> String {
        match &self.value {
            Some(value) => format!("{}={}", self.name, value),
            None => self.name.clone(),
        }
    }
}

pub(crate) fn parse(header_value: &str) -> Vec<Directive> {
    header_value
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| match directive.split_once('=') {
            Some((name, value)) => Directive {
                name: name.trim().to_ascii_lowercase(),
                value: Some(value.trim().to_string()).filter(|value| !value.is_empty()),
            },
            None => Directive {
                name: directive.to_ascii_lowercase(),
                value: None,
            },
        })
        .collect()
}

pub(crate) fn render<'a>(directives: impl IntoIterator<Item = &'a Directive>) -> String {
    directives
        .into_iter()
        .map(Directive::render)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        let directives = parse("Public, S-MaxAge=60 ,, stale-while-revalidate");
        assert_eq!(
            directives,
            vec![
                Directive {
                    name: "public".into(),
                    value: None
                },
                Directive {
                    name: "s-maxage".into(),
                    value: Some("60".into())
                },
                Directive {
                    name: "stale-while-revalidate".into(),
                    value: None
                },
            ]
        );
    }

    #[test]
    fn empty_value_is_treated_as_bare() {
        let directives = parse("stale-while-revalidate=");
        assert_eq!(directives[0].value, None);
    }

    #[test]
    fn render_joins_with_comma_space() {
        let directives = parse("max-age=0,must-revalidate");
        assert_eq!(render(&directives), "max-age=0, must-revalidate");
    }
}
