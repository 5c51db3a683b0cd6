//! Line-level fix templates.
//!
//! Every transform rewrites exactly one source line and never changes the
//! number of lines in the file, so bug ids derived from line numbers stay
//! stable across re-scans. Advisory fixes append a trailing comment instead
//! of inserting a new line.

use regex::{NoExpand, Regex, RegexBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    SqlFString,
    OsSystem,
    ShellTrue,
    SecretEnv,
    YamlSafeLoad,
    PickleAdvisory,
    PathAdvisory,
    InnerHtml,
    ReactHtmlAdvisory,
    VueHtml,
    SqlTemplateAdvisory,
    ExecAdvisory,
    ExecSyncAdvisory,
    SecretEnvJs,
    RedirectAdvisory,
    CorsRestrict,
    ProtoAdvisory,
}

#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub cwe: &'static str,
    pub matcher: &'static str,
    pub name: &'static str,
    pub transform: Transform,
    pub confidence: f64,
}

const fn tpl(
    cwe: &'static str,
    matcher: &'static str,
    name: &'static str,
    transform: Transform,
    confidence: f64,
) -> Template {
    Template {
        cwe,
        matcher,
        name,
        transform,
        confidence,
    }
}

const PYTHON_TEMPLATES: &[Template] = &[
    tpl("CWE-89", r#"f["']SELECT.*\{(\w+)\}"#, "Parameterized query", Transform::SqlFString, 0.85),
    tpl("CWE-78", r"os\.system\(", "subprocess without a shell", Transform::OsSystem, 0.90),
    tpl("CWE-78", r"shell=True", "shell=False", Transform::ShellTrue, 0.90),
    tpl("CWE-22", r"open\(.*\+", "basename + containment", Transform::PathAdvisory, 0.80),
    tpl(
        "CWE-798",
        r#"(\w*(?:password|secret|api_key|token)\w*)\s*=\s*["']"#,
        "Environment variable",
        Transform::SecretEnv,
        0.85,
    ),
    tpl("CWE-502", r"yaml\.load\(", "yaml.safe_load", Transform::YamlSafeLoad, 0.90),
    tpl("CWE-502", r"pickle\.load", "Use JSON or validate source", Transform::PickleAdvisory, 0.90),
];

const JS_TEMPLATES: &[Template] = &[
    tpl("CWE-79", r"innerHTML\s*=", "textContent", Transform::InnerHtml, 0.85),
    tpl("CWE-79", r"dangerouslySetInnerHTML", "DOMPurify.sanitize", Transform::ReactHtmlAdvisory, 0.85),
    tpl("CWE-79", r"v-html", "v-text", Transform::VueHtml, 0.85),
    tpl("CWE-89", r"`SELECT.*\$\{", "Parameterized query", Transform::SqlTemplateAdvisory, 0.80),
    tpl("CWE-78", r"execSync\(", "Avoid shell execution", Transform::ExecSyncAdvisory, 0.85),
    tpl("CWE-78", r"exec\(", "spawn with validation", Transform::ExecAdvisory, 0.85),
    tpl(
        "CWE-798",
        r#"(\w*(?:password|secret|apiKey|token|api_key)\w*)\s*[:=]\s*["']"#,
        "process.env",
        Transform::SecretEnvJs,
        0.85,
    ),
    tpl("CWE-601", r"res\.redirect\(req\.", "Validate against allowlist", Transform::RedirectAdvisory, 0.75),
    tpl("CWE-942", r#"origin:\s*['"]\*['"]"#, "Restrict origin", Transform::CorsRestrict, 0.90),
    tpl("CWE-1321", r"__proto__", "Validate keys or use Map", Transform::ProtoAdvisory, 0.80),
];

pub fn templates_for(language: &str) -> &'static [Template] {
    match language {
        "python" => PYTHON_TEMPLATES,
        "javascript" => JS_TEMPLATES,
        _ => &[],
    }
}

/// A successfully rewritten line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFix {
    pub fixed_line: String,
    pub confidence: f64,
    pub name: String,
}

fn case_insensitive(pattern: &str) -> Option<Regex> {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "invalid fix template");
            None
        }
    }
}

/// Apply the first CWE template for `language`/`cwe` that changes `line`.
pub fn apply_cwe_template(line: &str, language: &str, cwe: &str) -> Option<LineFix> {
    let indent = &line[..line.len() - line.trim_start().len()];
    templates_for(language)
        .iter()
        .filter(|t| t.cwe == cwe)
        .find_map(|t| {
            let re = case_insensitive(t.matcher)?;
            if !re.is_match(line) {
                return None;
            }
            let fixed = transform_line(line, t.transform, indent)?;
            (fixed != line).then(|| LineFix {
                fixed_line: fixed,
                confidence: t.confidence,
                name: t.name.to_string(),
            })
        })
}

/// Non-CWE pattern fixes keyed by detector id.
pub fn apply_pattern_fix(line: &str, pattern_id: &str) -> Option<LineFix> {
    let (matcher, replacement, confidence) = match pattern_id {
        "except" => (r"^(\s*)except:", "${1}except Exception as e:", 0.85),
        "eqeq" => (r" (==|!=) (null|undefined)", " ${1}= ${2}", 0.90),
        _ => return None,
    };
    let re = Regex::new(matcher).ok()?;
    if !re.is_match(line) {
        return None;
    }
    let fixed = re.replace_all(line, replacement).into_owned();
    (fixed != line).then(|| LineFix {
        fixed_line: fixed,
        confidence,
        name: format!("Pattern fix for {pattern_id}"),
    })
}

/// `apiKey` -> `API_KEY`, `db_password` -> `DB_PASSWORD`.
pub fn env_var_name(var: &str) -> String {
    let camel = Regex::new(r"([a-z0-9])([A-Z])").ok();
    match camel {
        Some(re) => re.replace_all(var, "${1}_${2}").to_uppercase(),
        None => var.to_uppercase(),
    }
}

fn advisory(line: &str, marker: &str, note: &str) -> String {
    format!("{}  {} SECURITY: {}", line.trim_end(), marker, note)
}

fn transform_line(line: &str, transform: Transform, indent: &str) -> Option<String> {
    match transform {
        Transform::SqlFString => {
            let placeholder = Regex::new(r"\{(\w+)\}").ok()?;
            let vars: Vec<&str> = placeholder
                .captures_iter(line)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if vars.is_empty() {
                return None;
            }
            let fixed = placeholder.replace_all(line, "?");
            let unprefixed = Regex::new(r#"f(["'])SELECT"#).ok()?;
            let fixed = unprefixed.replace(&fixed, "${1}SELECT");
            Some(format!(
                "{}  # params: ({},)",
                fixed.trim_end(),
                vars.join(", ")
            ))
        }
        Transform::OsSystem => {
            let call = Regex::new(r"os\.system\((.*)\)").ok()?;
            let caps = call.captures(line)?;
            let arg = caps.get(1)?.as_str();
            let replacement = format!("subprocess.run(shlex.split({arg}), check=True)");
            Some(call.replace(line, NoExpand(&replacement)).into_owned())
        }
        Transform::ShellTrue => Some(line.replace("shell=True", "shell=False")),
        Transform::SecretEnv => {
            let re = case_insensitive(r#"(\w*(?:password|secret|api_key|token)\w*)\s*=\s*["']([^"']+)["']"#)?;
            let var = re.captures(line)?.get(1)?.as_str();
            Some(format!(
                "{indent}{var} = os.environ.get(\"{}\")",
                env_var_name(var)
            ))
        }
        Transform::YamlSafeLoad => Some(line.replace("yaml.load(", "yaml.safe_load(")),
        Transform::PickleAdvisory => Some(advisory(line, "#", "validate pickle source or use JSON instead")),
        Transform::PathAdvisory => Some(advisory(
            line,
            "#",
            "validate path with os.path.basename() and check containment",
        )),
        Transform::InnerHtml => Some(line.replace("innerHTML", "textContent")),
        Transform::ReactHtmlAdvisory => Some(advisory(
            line,
            "//",
            "sanitize with DOMPurify.sanitize() before dangerouslySetInnerHTML",
        )),
        Transform::VueHtml => Some(line.replace("v-html", "v-text")),
        Transform::SqlTemplateAdvisory => Some(advisory(
            line,
            "//",
            "use a parameterized query, e.g. db.query('SELECT ... WHERE id = ?', [id])",
        )),
        Transform::ExecAdvisory => Some(advisory(
            line,
            "//",
            "avoid exec(); use spawn() with validated arguments",
        )),
        Transform::ExecSyncAdvisory => Some(advisory(
            line,
            "//",
            "avoid execSync(); use spawnSync() with validated arguments",
        )),
        Transform::SecretEnvJs => {
            let re = case_insensitive(r#"(\w*(?:password|secret|apiKey|token|api_key)\w*)\s*[:=]\s*["']"#)?;
            let caps = re.captures(line)?;
            let var = caps.get(1)?.as_str();
            let env = env_var_name(var);
            let is_property = line[caps.get(1)?.end()..].trim_start().starts_with(':');
            if is_property {
                Some(format!("{indent}{var}: process.env.{env},"))
            } else {
                Some(format!("{indent}const {var} = process.env.{env};"))
            }
        }
        Transform::RedirectAdvisory => Some(advisory(
            line,
            "//",
            "validate redirect URL against an allowlist",
        )),
        Transform::CorsRestrict => Some(
            line.replace("'*'", "process.env.ALLOWED_ORIGINS")
                .replace("\"*\"", "process.env.ALLOWED_ORIGINS"),
        ),
        Transform::ProtoAdvisory => Some(advisory(
            line,
            "//",
            "prototype pollution; validate object keys or use Map",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_system_keeps_indentation_and_argument() {
        let fix = apply_cwe_template("    os.system(user_cmd)", "python", "CWE-78").unwrap();
        assert_eq!(fix.fixed_line, "    subprocess.run(shlex.split(user_cmd), check=True)");
        assert!((fix.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_shell_true() {
        let fix = apply_cwe_template("subprocess.call(cmd, shell=True)", "python", "CWE-78").unwrap();
        assert_eq!(fix.fixed_line, "subprocess.call(cmd, shell=False)");
    }

    #[test]
    fn test_secret_to_env() {
        let fix = apply_cwe_template("API_KEY = \"sk-secret-12345\"", "python", "CWE-798").unwrap();
        assert_eq!(fix.fixed_line, "API_KEY = os.environ.get(\"API_KEY\")");

        let fix = apply_cwe_template("  apiKey: 'abc',", "javascript", "CWE-798").unwrap();
        assert_eq!(fix.fixed_line, "  apiKey: process.env.API_KEY,");

        let fix = apply_cwe_template("let dbPassword = \"hunter2\";", "javascript", "CWE-798").unwrap();
        assert_eq!(fix.fixed_line, "const dbPassword = process.env.DB_PASSWORD;");
    }

    #[test]
    fn test_sql_fstring() {
        let fix = apply_cwe_template(
            "query = f\"SELECT * FROM users WHERE id = {user_id}\"",
            "python",
            "CWE-89",
        )
        .unwrap();
        assert_eq!(
            fix.fixed_line,
            "query = \"SELECT * FROM users WHERE id = ?\"  # params: (user_id,)"
        );
    }

    #[test]
    fn test_advisories_do_not_add_lines() {
        let fix = apply_cwe_template("data = pickle.load(f)", "python", "CWE-502").unwrap();
        assert!(!fix.fixed_line.contains('\n'));
        assert!(fix.fixed_line.starts_with("data = pickle.load(f)  # SECURITY:"));
    }

    #[test]
    fn test_js_transforms() {
        assert_eq!(
            apply_cwe_template("el.innerHTML = data;", "javascript", "CWE-79").unwrap().fixed_line,
            "el.textContent = data;"
        );
        assert_eq!(
            apply_cwe_template("app.use(cors({ origin: '*' }));", "javascript", "CWE-942")
                .unwrap()
                .fixed_line,
            "app.use(cors({ origin: process.env.ALLOWED_ORIGINS }));"
        );
    }

    #[test]
    fn test_unknown_cwe_has_no_template() {
        assert!(apply_cwe_template("parse(x)", "python", "CWE-611").is_none());
        assert!(apply_cwe_template("os.system(x)", "java", "CWE-78").is_none());
    }

    #[test]
    fn test_pattern_fixes() {
        assert_eq!(
            apply_pattern_fix("    except:", "except").unwrap().fixed_line,
            "    except Exception as e:"
        );
        assert_eq!(
            apply_pattern_fix("if (a == null || b != undefined) {", "eqeq").unwrap().fixed_line,
            "if (a === null || b !== undefined) {"
        );
        assert!(apply_pattern_fix("except ValueError:", "except").is_none());
        assert!(apply_pattern_fix("anything", "todo").is_none());
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("apiKey"), "API_KEY");
        assert_eq!(env_var_name("db_password"), "DB_PASSWORD");
    }
}
