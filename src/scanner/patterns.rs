//! Detector tables, keyed by language and category.
//!
//! Each detector fires when any of its indicator substrings appears on a
//! non-comment line.

use crate::session::{Category, Severity};

#[derive(Debug, Clone, Copy)]
pub struct Detector {
    pub id: &'static str,
    pub cwe: Option<&'static str>,
    pub description: &'static str,
    pub indicators: &'static [&'static str],
    pub severity: Severity,
}

const fn det(
    id: &'static str,
    cwe: Option<&'static str>,
    description: &'static str,
    indicators: &'static [&'static str],
    severity: Severity,
) -> Detector {
    Detector {
        id,
        cwe,
        description,
        indicators,
        severity,
    }
}

const PYTHON_SECURITY: &[Detector] = &[
    det(
        "sqli",
        Some("CWE-89"),
        "SQL Injection",
        &["execute(", "f\"SELECT", "f'SELECT", ".format(", "% (", "+ query", "+ \"SELECT"],
        Severity::High,
    ),
    det(
        "cmdi",
        Some("CWE-78"),
        "Command Injection",
        &["os.system(", "subprocess.call(", "shell=True", "eval(", "exec(", "os.popen("],
        Severity::High,
    ),
    det(
        "path",
        Some("CWE-22"),
        "Path Traversal",
        &["open(user", "open(req", "open(input", "../", "..\\"],
        Severity::High,
    ),
    det(
        "secret",
        Some("CWE-798"),
        "Hardcoded Credential",
        &[
            "PASSWORD = \"",
            "password = \"",
            "API_KEY = \"",
            "SECRET = \"",
            "TOKEN = \"",
            "api_key = \"",
            "secret_key = \"",
            "aws_secret",
        ],
        Severity::High,
    ),
    det(
        "xxe",
        Some("CWE-611"),
        "XXE Injection",
        &["xml.etree", "lxml.etree", "XMLParser", "parse("],
        Severity::High,
    ),
    det(
        "ssrf",
        Some("CWE-918"),
        "Server-Side Request Forgery",
        &["requests.get(user", "urllib.request.urlopen(", "httpx.get("],
        Severity::High,
    ),
    det(
        "deser",
        Some("CWE-502"),
        "Unsafe Deserialization",
        &["pickle.load", "yaml.load(", "yaml.unsafe_load", "marshal.load"],
        Severity::High,
    ),
];

const PYTHON_LOGIC: &[Detector] = &[
    det(
        "except",
        None,
        "Bare Exception Handler",
        &["except:", "except Exception:"],
        Severity::Medium,
    ),
    det("assert", None, "Assert in Production", &["assert "], Severity::Low),
];

const PYTHON_QUALITY: &[Detector] = &[det(
    "todo",
    None,
    "TODO/FIXME Marker",
    &["TODO:", "FIXME:", "HACK:", "XXX:"],
    Severity::Info,
)];

const JS_SECURITY: &[Detector] = &[
    det(
        "xss",
        Some("CWE-79"),
        "Cross-Site Scripting",
        &[
            "innerHTML",
            "outerHTML",
            "document.write(",
            "dangerouslySetInnerHTML",
            ".html(",
            "v-html",
            "insertAdjacentHTML",
        ],
        Severity::High,
    ),
    det(
        "sqli",
        Some("CWE-89"),
        "SQL Injection",
        &[
            "query(`SELECT",
            "query('SELECT",
            "`SELECT",
            "` + ",
            " + `",
            "${",
            "execute(`",
            "raw(`",
        ],
        Severity::High,
    ),
    det(
        "cmdi",
        Some("CWE-78"),
        "Command Injection",
        &["exec(", "execSync(", "spawn(", "child_process", "shelljs"],
        Severity::High,
    ),
    det(
        "eval",
        Some("CWE-95"),
        "Code Injection",
        &["eval(", "new Function(", "setTimeout(str", "setInterval(str"],
        Severity::High,
    ),
    det(
        "secret",
        Some("CWE-798"),
        "Hardcoded Credential",
        &[
            "password:",
            "apiKey:",
            "secret:",
            "token:",
            "api_key:",
            "PASSWORD =",
            "API_KEY =",
            "SECRET =",
            "apiKey =",
            "password =",
        ],
        Severity::High,
    ),
    det(
        "proto",
        Some("CWE-1321"),
        "Prototype Pollution",
        &["__proto__", "constructor.prototype", "Object.assign(target,"],
        Severity::High,
    ),
    det(
        "path",
        Some("CWE-22"),
        "Path Traversal",
        &[
            "req.params",
            "req.query",
            "req.body",
            "../",
            "path.join(",
            "fs.readFile(req",
            "fs.readFileSync(",
        ],
        Severity::High,
    ),
    det(
        "redirect",
        Some("CWE-601"),
        "Open Redirect",
        &[
            "res.redirect(req.",
            "location.href =",
            "window.location =",
            "location.replace(",
        ],
        Severity::Medium,
    ),
    det(
        "nosqli",
        Some("CWE-943"),
        "NoSQL Injection",
        &["$where", "$regex", "$ne", "$gt", "$lt", ".find({$", "$or"],
        Severity::High,
    ),
    det(
        "ssrf",
        Some("CWE-918"),
        "Server-Side Request Forgery",
        &["fetch(req.", "axios.get(req.", "http.get(user"],
        Severity::High,
    ),
];

const JS_AUTH: &[Detector] = &[
    det(
        "jwt-none",
        Some("CWE-347"),
        "JWT Algorithm None",
        &["algorithm: 'none'", "algorithm: \"none\"", "algorithms: ['none"],
        Severity::Critical,
    ),
    det(
        "cors",
        Some("CWE-942"),
        "Permissive CORS",
        &[
            "origin: '*'",
            "origin: \"*\"",
            "Access-Control-Allow-Origin: *",
            "origin: true",
        ],
        Severity::High,
    ),
    det(
        "csrf",
        Some("CWE-352"),
        "Missing CSRF Protection",
        &["csrf: false", "csrfProtection: false", "ignoreCsrf"],
        Severity::High,
    ),
    det(
        "noauth",
        Some("CWE-306"),
        "Missing Authentication Check",
        &[
            "// TODO: add auth",
            "// FIXME: auth",
            "authenticate: false",
            "requireAuth: false",
        ],
        Severity::High,
    ),
];

const JS_LOGIC: &[Detector] = &[
    det(
        "eqeq",
        None,
        "Loose Equality",
        &[" == null", " == undefined", " != null", " != undefined"],
        Severity::Low,
    ),
    det(
        "console",
        None,
        "Console Statement",
        &["console.log(", "console.error(", "console.warn("],
        Severity::Info,
    ),
];

const JAVA_SECURITY: &[Detector] = &[
    det(
        "sqli",
        Some("CWE-89"),
        "SQL Injection",
        &["executeQuery(", "createQuery(", "+ \"SELECT", "Statement("],
        Severity::High,
    ),
    det(
        "cmdi",
        Some("CWE-78"),
        "Command Injection",
        &["Runtime.getRuntime().exec(", "ProcessBuilder("],
        Severity::High,
    ),
    det(
        "xxe",
        Some("CWE-611"),
        "XXE Injection",
        &["XMLInputFactory", "DocumentBuilder", "SAXParser"],
        Severity::High,
    ),
    det(
        "deser",
        Some("CWE-502"),
        "Unsafe Deserialization",
        &["ObjectInputStream", "readObject(", "XMLDecoder"],
        Severity::High,
    ),
    det(
        "path",
        Some("CWE-22"),
        "Path Traversal",
        &["new File(request", "Paths.get(request", "../"],
        Severity::High,
    ),
];

/// Markers that make a match more likely to be exploitable.
pub const DANGEROUS_MARKERS: &[&str] = &["eval(", "exec(", "shell=True", "innerHTML", "__proto__"];

/// Lowercase hints that a line is fixture or sample code.
pub const FALSE_POSITIVE_HINTS: &[&str] = &["test", "mock", "example", "sample", "demo"];

/// Language tag for a file extension, or `None` when the file is not scanned.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "py" => Some("python"),
        "js" | "mjs" | "cjs" | "ts" | "tsx" | "jsx" | "vue" | "svelte" => Some("javascript"),
        "java" | "kt" => Some("java"),
        _ => None,
    }
}

pub fn detectors(language: &str, category: Category) -> &'static [Detector] {
    match (language, category) {
        ("python", Category::Security) => PYTHON_SECURITY,
        ("python", Category::Logic) => PYTHON_LOGIC,
        ("python", Category::Quality) => PYTHON_QUALITY,
        ("javascript", Category::Security) => JS_SECURITY,
        ("javascript", Category::Auth) => JS_AUTH,
        ("javascript", Category::Logic) => JS_LOGIC,
        ("java", Category::Security) => JAVA_SECURITY,
        _ => &[],
    }
}

/// Detection confidence for `line` under `detector`, clamped to [0.3, 0.95].
pub fn confidence(line: &str, detector: &Detector) -> f64 {
    let mut score: f64 = 0.7;

    let matching = detector
        .indicators
        .iter()
        .filter(|ind| line.contains(*ind))
        .count();
    if matching > 1 {
        score += 0.1;
    }
    if DANGEROUS_MARKERS.iter().any(|m| line.contains(m)) {
        score += 0.1;
    }
    let lower = line.to_lowercase();
    if FALSE_POSITIVE_HINTS.iter().any(|h| lower.contains(h)) {
        score -= 0.2;
    }

    score.clamp(0.3, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(language: &str, category: Category, id: &str) -> Detector {
        *detectors(language, category)
            .iter()
            .find(|d| d.id == id)
            .unwrap()
    }

    #[test]
    fn test_language_for_extension() {
        assert_eq!(language_for_extension("py"), Some("python"));
        assert_eq!(language_for_extension("tsx"), Some("javascript"));
        assert_eq!(language_for_extension("kt"), Some("java"));
        assert_eq!(language_for_extension("rs"), None);
    }

    #[test]
    fn test_confidence_base() {
        let cmdi = find("python", Category::Security, "cmdi");
        assert!((confidence("os.system(user_cmd)", &cmdi) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_boosts_and_clamps() {
        let cmdi = find("python", Category::Security, "cmdi");
        // two indicators + dangerous marker
        let line = "subprocess.call(cmd, shell=True)";
        assert!((confidence(line, &cmdi) - 0.9).abs() < 1e-9);
        // false-positive hint
        let line = "os.system(test_cmd)";
        assert!((confidence(line, &cmdi) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_java_has_no_logic_detectors() {
        assert!(detectors("java", Category::Logic).is_empty());
        assert!(detectors("python", Category::Auth).is_empty());
    }
}
