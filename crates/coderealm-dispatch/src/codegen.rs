use coderealm_core::{Error, Result, types::ProblemTemplate};

/// Combines requester code with a problem's scaffold into a runnable program.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, language: &str, user_code: &str, template: &ProblemTemplate)
    -> Result<String>;
}

/// Marker replaced by the requester code in a scaffold.
pub const USER_CODE_MARKER: &str = "{{USER_CODE}}";

/// Substitutes the requester code for [`USER_CODE_MARKER`] in the scaffold.
///
/// The scaffold carries the driver (input parsing, test harness, verdict
/// printing); the requester only supplies the solution body.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerGenerator;

impl CodeGenerator for MarkerGenerator {
    fn generate(
        &self,
        language: &str,
        user_code: &str,
        template: &ProblemTemplate,
    ) -> Result<String> {
        if user_code.trim().is_empty() {
            return Err(Error::Generation {
                reason: "submitted code is empty".to_string(),
            });
        }

        if template.language != language {
            return Err(Error::Generation {
                reason: format!(
                    "template for {} used with {language} code",
                    template.language
                ),
            });
        }

        if !template.scaffold.contains(USER_CODE_MARKER) {
            return Err(Error::Generation {
                reason: format!(
                    "{language} template of problem {} has no {USER_CODE_MARKER} marker",
                    template.problem_id
                ),
            });
        }

        Ok(template.scaffold.replacen(USER_CODE_MARKER, user_code, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(scaffold: &str) -> ProblemTemplate {
        ProblemTemplate {
            problem_id: "two-sum".to_string(),
            language: "python".to_string(),
            scaffold: scaffold.to_string(),
        }
    }

    #[test]
    fn substitutes_user_code() {
        let tpl = template("import json\n{{USER_CODE}}\nprint(json.dumps({'status': check()}))");
        let code = MarkerGenerator
            .generate("python", "def check(): return True", &tpl)
            .unwrap();

        assert_eq!(
            code,
            "import json\ndef check(): return True\nprint(json.dumps({'status': check()}))"
        );
    }

    #[test]
    fn rejects_unusable_inputs() {
        let tpl = template("{{USER_CODE}}");
        assert!(MarkerGenerator.generate("python", "  \n", &tpl).is_err());
        assert!(MarkerGenerator.generate("cpp", "int x;", &tpl).is_err());

        let err = MarkerGenerator
            .generate("python", "x = 1", &template("print(1)"))
            .unwrap_err();
        assert_eq!(err.kind(), "generation");
    }
}
