//! Static isolation rule tables.
//!
//! Rules run in a fixed order and the first match denies:
//!
//! 1. reserved system catalogs (always)
//! 2. destructive and privileged verbs (unless a system operation)
//! 3. cross-tenant schema references (tenant operations only)
//! 4. injection signatures (always)
//!
//! Matching is regex based and best-effort. It is one layer of defense and
//! assumes call sites also parameterize their queries.

use regex::Regex;

use crate::audit::Severity;
use crate::config::ValidatorConfig;
use crate::error::ConfigurationError;
use crate::tenant::SchemaNaming;

use super::verdict::{ReasonCode, ValidationVerdict};

/// The ordered rule stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RuleStage {
    SystemCatalog,
    Destructive,
    CrossTenant,
    Injection,
}

impl RuleStage {
    /// Evaluation order.
    pub(crate) const ORDER: [RuleStage; 4] = [
        RuleStage::SystemCatalog,
        RuleStage::Destructive,
        RuleStage::CrossTenant,
        RuleStage::Injection,
    ];
}

/// A rule definition: id, reason, severity, case-insensitive pattern.
type RuleSpec = (&'static str, ReasonCode, Severity, &'static str);

const CATALOG_RULES: &[RuleSpec] = &[
    (
        "catalog.pg_catalog",
        ReasonCode::SystemCatalogAccess,
        Severity::Critical,
        r"\bpg_catalog\b",
    ),
    (
        "catalog.information_schema",
        ReasonCode::SystemCatalogAccess,
        Severity::Critical,
        r"\binformation_schema\b",
    ),
    (
        "catalog.internal_schema",
        ReasonCode::SystemCatalogAccess,
        Severity::Critical,
        r"\bpg_(toast|temp)\w*\b",
    ),
    (
        "catalog.system_relation",
        ReasonCode::SystemCatalogAccess,
        Severity::Critical,
        r"\bpg_(authid|shadow|user|users|roles|auth_members|namespace|class|attribute|proc|database|tablespace|tables|views|indexes|settings|file_settings|hba_file_rules|user_mappings|largeobject\w*|stat_\w+|statio_\w+|statistic\w*|locks|prepared_xacts)\b",
    ),
];

const DESTRUCTIVE_RULES: &[RuleSpec] = &[
    (
        "destructive.drop",
        ReasonCode::DestructiveOperation,
        Severity::High,
        r"\bdrop\s+(schema|database|table|role|user|owned|view|materialized\s+view|function|procedure|index|sequence|extension|trigger|policy|type)\b",
    ),
    (
        "destructive.truncate",
        ReasonCode::DestructiveOperation,
        Severity::High,
        r"\btruncate\b",
    ),
    (
        "destructive.alter",
        ReasonCode::DestructiveOperation,
        Severity::High,
        r"\balter\s+[a-z]+",
    ),
    (
        "destructive.create_schema",
        ReasonCode::DestructiveOperation,
        Severity::High,
        r"\bcreate\s+(schema|database|role|user)\b",
    ),
    (
        "privileged.grant",
        ReasonCode::PrivilegedOperation,
        Severity::High,
        r"\b(grant|revoke)\b",
    ),
    (
        "privileged.scope_switch",
        ReasonCode::PrivilegedOperation,
        Severity::High,
        r"\b(set|reset)\s+((local|session)\s+)?(search_path|role|session\s+authorization|all)\b",
    ),
    (
        "privileged.set_config",
        ReasonCode::PrivilegedOperation,
        Severity::High,
        r"\bset_config\s*\(",
    ),
    (
        "privileged.discard",
        ReasonCode::PrivilegedOperation,
        Severity::High,
        r"\bdiscard\s+all\b",
    ),
];

const INJECTION_RULES: &[RuleSpec] = &[
    (
        "injection.union_select",
        ReasonCode::InjectionSignature,
        Severity::Critical,
        r"\bunion\s+(all\s+)?select\s+(null\b|\d+\s*(,|\bfrom\b|$)|version\s*\(|current_user\b|session_user\b|user\b|current_database\s*\(|current_schema\b|@@)",
    ),
    (
        "injection.code_execution",
        ReasonCode::InjectionSignature,
        Severity::Critical,
        r"\b(pg_sleep\w*|pg_read_file|pg_read_binary_file|pg_ls_dir|pg_stat_file|lo_import|lo_export|lo_from_bytea|dblink\w*|query_to_xml\w*|xp_cmdshell|sp_execute\w*|load_file|benchmark|sleep|waitfor)\s*\(",
    ),
    (
        "injection.copy_program",
        ReasonCode::InjectionSignature,
        Severity::Critical,
        r"\bcopy\b[^;]*\b(program|stdin|stdout)\b",
    ),
    (
        "injection.dynamic_execution",
        ReasonCode::InjectionSignature,
        Severity::Critical,
        r"\b(execute|exec)\s+|\bdo\s+('|\$)|\bcreate\s+(or\s+replace\s+)?(function|procedure|trigger|language|rule)\b",
    ),
    (
        "injection.file_write",
        ReasonCode::InjectionSignature,
        Severity::Critical,
        r"\binto\s+(out|dump)file\b",
    ),
    (
        "injection.encoded_payload",
        ReasonCode::InjectionSignature,
        Severity::High,
        r"\bchr\s*\(\s*\d+\s*\)\s*\|\||\b0x[0-9a-f]{8,}\b",
    ),
];

/// Identifier in either quoted or bare form.
const IDENTIFIER: &str = r#""(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*"#;

/// Lexical summary of a query.
///
/// `code` is the query with every string literal replaced by a placeholder
/// `'L<n>'` and comments replaced by spaces, so keyword rules see neither.
/// Equal literal contents share one placeholder index. Unicode-escaped
/// identifiers (`U&"..."`) appear decoded as plain quoted identifiers.
#[derive(Debug, Default)]
struct Lexed {
    code: String,
    literals: Vec<String>,
    line_comment: bool,
    unterminated_comment: bool,
    unbalanced_quote: bool,
    invalid_escape: bool,
    statements: usize,
}

impl Lexed {
    fn push_literal(&mut self, content: String) {
        let index = match self.literals.iter().position(|l| *l == content) {
            Some(index) => index,
            None => {
                self.literals.push(content);
                self.literals.len() - 1
            }
        };
        self.code.push_str(&format!("'L{}'", index));
    }

    fn literal(&self, placeholder: &str) -> Option<&str> {
        let index: usize = placeholder.parse().ok()?;
        self.literals.get(index).map(String::as_str)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Scans a `'...'` literal starting at the opening quote.
///
/// Returns the content, the index after the closing quote and whether the
/// literal was closed. With `backslash_escapes` (`E'...'` strings) a
/// backslash escapes the next character.
fn scan_string(chars: &[char], open: usize, backslash_escapes: bool) -> (String, usize, bool) {
    let mut content = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if backslash_escapes => {
                if let Some(&escaped) = chars.get(i + 1) {
                    content.push(escaped);
                }
                i += 2;
            }
            '\'' if chars.get(i + 1) == Some(&'\'') => {
                content.push('\'');
                i += 2;
            }
            '\'' => return (content, i + 1, true),
            other => {
                content.push(other);
                i += 1;
            }
        }
    }
    (content, chars.len(), false)
}

/// Scans a `"..."` identifier starting at the opening quote.
fn scan_quoted_identifier(chars: &[char], open: usize) -> (String, usize, bool) {
    let mut name = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        if chars[i] == '"' {
            if chars.get(i + 1) == Some(&'"') {
                name.push('"');
                i += 2;
                continue;
            }
            return (name, i + 1, true);
        }
        name.push(chars[i]);
        i += 1;
    }
    (name, chars.len(), false)
}

/// Returns the `$tag$` opening delimiter starting at `start`, if any.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut end = start + 1;
    while let Some(&c) = chars.get(end) {
        if c == '$' {
            return Some(chars[start..=end].iter().collect());
        }
        let valid = if end == start + 1 {
            c.is_alphabetic() || c == '_'
        } else {
            c.is_alphanumeric() || c == '_'
        };
        if !valid {
            return None;
        }
        end += 1;
    }
    None
}

/// Parses an optional `UESCAPE 'c'` clause at `start`.
///
/// Returns the escape character and the index after the clause, or the
/// default backslash and `start` when no clause follows.
fn uescape_clause(chars: &[char], start: usize) -> Result<(char, usize), ()> {
    let mut i = start;
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    let keyword: String = chars.iter().skip(i).take(7).collect();
    let keyword_ends = !chars.get(i + 7).copied().is_some_and(is_ident_char);
    if !keyword.eq_ignore_ascii_case("uescape") || !keyword_ends {
        return Ok(('\\', start));
    }
    i += 7;
    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    match (chars.get(i), chars.get(i + 1), chars.get(i + 2)) {
        (Some('\''), Some(&escape), Some('\''))
            if !escape.is_ascii_hexdigit()
                && !escape.is_whitespace()
                && !matches!(escape, '+' | '\'' | '"') =>
        {
            Ok((escape, i + 3))
        }
        _ => Err(()),
    }
}

/// Decodes the escapes of a `U&"..."` identifier.
fn decode_unicode_escapes(raw: &str, escape: char) -> Option<String> {
    let chars: Vec<char> = raw.chars().collect();
    let mut decoded = String::with_capacity(raw.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != escape {
            decoded.push(chars[i]);
            i += 1;
            continue;
        }
        let (digits, skip) = match chars.get(i + 1) {
            Some(&c) if c == escape => {
                decoded.push(escape);
                i += 2;
                continue;
            }
            Some('+') => (6, 2),
            _ => (4, 1),
        };
        let hex: String = chars.iter().skip(i + skip).take(digits).collect();
        if hex.len() != digits || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        decoded.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
        i += skip + digits;
    }
    Some(decoded)
}

fn lex(query: &str) -> Lexed {
    let chars: Vec<char> = query.chars().collect();
    let mut out = Lexed {
        code: String::with_capacity(query.len()),
        ..Default::default()
    };
    let mut i = 0;
    let mut pending_statement = false;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let word_start = i == 0 || !is_ident_char(chars[i - 1]);

        match c {
            '\'' => {
                let escaped = i >= 1
                    && matches!(chars[i - 1], 'e' | 'E')
                    && (i == 1 || !is_ident_char(chars[i - 2]));
                let (content, end, closed) = scan_string(&chars, i, escaped);
                if closed {
                    out.push_literal(content);
                } else {
                    out.code.push('\'');
                    out.unbalanced_quote = true;
                }
                i = end;
                pending_statement = true;
            }
            '$' if word_start => match dollar_tag(&chars, i) {
                Some(tag) => {
                    let body_start = i + tag.chars().count();
                    let rest: String = chars[body_start..].iter().collect();
                    match rest.find(&tag) {
                        Some(offset) => {
                            let content = rest[..offset].to_string();
                            i = body_start + content.chars().count() + tag.chars().count();
                            out.push_literal(content);
                        }
                        None => {
                            out.code.push('\'');
                            out.unbalanced_quote = true;
                            i = chars.len();
                        }
                    }
                    pending_statement = true;
                }
                None => {
                    out.code.push(c);
                    i += 1;
                    pending_statement = true;
                }
            },
            'u' | 'U' if word_start && next == Some('&') && chars.get(i + 2) == Some(&'"') => {
                let (raw, end, closed) = scan_quoted_identifier(&chars, i + 2);
                pending_statement = true;
                if !closed {
                    out.code.push('"');
                    out.unbalanced_quote = true;
                    i = end;
                    continue;
                }
                let decoded = uescape_clause(&chars, end)
                    .ok()
                    .and_then(|(escape, after)| {
                        decode_unicode_escapes(&raw, escape).map(|name| (name, after))
                    });
                match decoded {
                    Some((name, after)) => {
                        out.code.push('"');
                        out.code.push_str(&name.replace('"', "\"\""));
                        out.code.push('"');
                        i = after;
                    }
                    None => {
                        out.invalid_escape = true;
                        out.code.push_str("\"\"");
                        i = end;
                    }
                }
            }
            '"' => {
                let (name, end, closed) = scan_quoted_identifier(&chars, i);
                out.code.push('"');
                out.code.push_str(&name.replace('"', "\"\""));
                if closed {
                    out.code.push('"');
                } else {
                    out.unbalanced_quote = true;
                }
                i = end;
                pending_statement = true;
            }
            '-' if next == Some('-') => {
                out.line_comment = true;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.code.push(' ');
            }
            '/' if next == Some('*') => {
                i += 2;
                let mut depth = 1;
                while i < chars.len() && depth > 0 {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        depth -= 1;
                        i += 2;
                    } else if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                        depth += 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                if depth > 0 {
                    out.unterminated_comment = true;
                }
                out.code.push(' ');
            }
            ';' => {
                if pending_statement {
                    out.statements += 1;
                    pending_statement = false;
                }
                out.code.push(';');
                i += 1;
            }
            _ => {
                if !c.is_whitespace() {
                    pending_statement = true;
                }
                out.code.push(c);
                i += 1;
            }
        }
    }

    if pending_statement {
        out.statements += 1;
    }
    out
}

struct CompiledRule {
    id: &'static str,
    reason: ReasonCode,
    severity: Severity,
    regex: Regex,
}

/// Compiled rule tables shared by all validations.
pub(crate) struct RuleSet {
    catalog: Vec<CompiledRule>,
    destructive: Vec<CompiledRule>,
    injection: Vec<CompiledRule>,
    qualified_chain: Regex,
    identifier: Regex,
    delete_statement: Regex,
    where_clause: Regex,
    always_true: Regex,
    always_true_literal: Regex,
    always_like: Regex,
    reserved_schemas: Vec<String>,
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("catalog", &self.catalog.len())
            .field("destructive", &self.destructive.len())
            .field("injection", &self.injection.len())
            .field("reserved_schemas", &self.reserved_schemas)
            .finish()
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigurationError> {
    Regex::new(&format!("(?i){}", pattern)).map_err(|source| ConfigurationError::InvalidPattern {
        field: "validator.rules",
        source,
    })
}

fn compile_table(specs: &[RuleSpec]) -> Result<Vec<CompiledRule>, ConfigurationError> {
    specs
        .iter()
        .map(|(id, reason, severity, pattern)| {
            Ok(CompiledRule {
                id: *id,
                reason: *reason,
                severity: *severity,
                regex: compile(pattern)?,
            })
        })
        .collect()
}

impl RuleSet {
    /// Compiles the rule tables.
    pub(crate) fn compile(config: &ValidatorConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            catalog: compile_table(CATALOG_RULES)?,
            destructive: compile_table(DESTRUCTIVE_RULES)?,
            injection: compile_table(INJECTION_RULES)?,
            qualified_chain: compile(&format!(
                r"(?:{id})(?:\s*\.\s*(?:{id}|\*))+",
                id = IDENTIFIER
            ))?,
            identifier: compile(IDENTIFIER)?,
            delete_statement: compile(r"\bdelete\s+from\b[^;]*")?,
            where_clause: compile(r"\bwhere\b")?,
            always_true: compile(
                r"\b(or|and)\s+('[^']*'|\d+(?:\.\d+)?)\s*=\s*('[^']*'|\d+(?:\.\d+)?)",
            )?,
            always_true_literal: compile(
                r"\bor\s+(true|not\s+false)\b|\bor\s+(\d+)\s*>\s*(\d+)\b",
            )?,
            always_like: compile(r"\bor\s+[a-z_][a-z0-9_.]*\s+like\s+'L(\d+)'")?,
            reserved_schemas: config
                .reserved_schemas
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        })
    }

    /// Evaluates the static rules.
    ///
    /// `own_schema` is the resolved tenant's schema for tenant operations and
    /// `None` for system operations.
    pub(crate) fn evaluate(
        &self,
        query: &str,
        own_schema: Option<&str>,
        is_system: bool,
        naming: &SchemaNaming,
    ) -> ValidationVerdict {
        let lexed = lex(query);
        let qualified = self.qualified_schemas(&lexed.code);

        for stage in RuleStage::ORDER {
            let denial = match stage {
                RuleStage::SystemCatalog => self.check_catalog(&lexed, &qualified),
                RuleStage::Destructive if is_system => None,
                RuleStage::Destructive => self.check_destructive(&lexed),
                RuleStage::CrossTenant => match (is_system, own_schema) {
                    (false, Some(own)) => self.check_cross_tenant(own, &qualified, naming),
                    _ => None,
                },
                RuleStage::Injection => self.check_injection(&lexed),
            };
            if let Some(verdict) = denial {
                return verdict;
            }
        }

        ValidationVerdict::allow()
    }

    fn check_catalog(&self, lexed: &Lexed, qualified: &[String]) -> Option<ValidationVerdict> {
        if let Some(rule) = first_match(&self.catalog, &lexed.code) {
            return Some(rule);
        }

        let reserved = qualified
            .iter()
            .any(|schema| self.reserved_schemas.contains(&schema.to_lowercase()));
        reserved.then(|| {
            ValidationVerdict::deny(
                ReasonCode::SystemCatalogAccess,
                Severity::Critical,
                "catalog.reserved_schema",
            )
        })
    }

    fn check_destructive(&self, lexed: &Lexed) -> Option<ValidationVerdict> {
        if let Some(rule) = first_match(&self.destructive, &lexed.code) {
            return Some(rule);
        }

        let unqualified_delete = self
            .delete_statement
            .find_iter(&lexed.code)
            .any(|m| !self.where_clause.is_match(m.as_str()));
        unqualified_delete.then(|| {
            ValidationVerdict::deny(
                ReasonCode::DestructiveOperation,
                Severity::High,
                "destructive.unqualified_delete",
            )
        })
    }

    fn check_cross_tenant(
        &self,
        own_schema: &str,
        qualified: &[String],
        naming: &SchemaNaming,
    ) -> Option<ValidationVerdict> {
        let foreign = qualified
            .iter()
            .any(|schema| naming.is_tenant_schema(schema) && schema != own_schema);
        foreign.then(|| {
            ValidationVerdict::deny(
                ReasonCode::CrossTenantAccess,
                Severity::Critical,
                "cross_tenant.qualified_identifier",
            )
        })
    }

    fn check_injection(&self, lexed: &Lexed) -> Option<ValidationVerdict> {
        let lexical = if lexed.unbalanced_quote {
            Some("injection.unbalanced_quote")
        } else if lexed.invalid_escape {
            Some("injection.invalid_escape")
        } else if lexed.line_comment {
            Some("injection.comment_terminator")
        } else if lexed.unterminated_comment {
            Some("injection.unterminated_comment")
        } else if lexed.statements > 1 {
            Some("injection.stacked_statements")
        } else {
            None
        };
        if let Some(rule) = lexical {
            return Some(ValidationVerdict::deny(
                ReasonCode::InjectionSignature,
                Severity::Critical,
                rule,
            ));
        }

        if let Some(rule) = first_match(&self.injection, &lexed.code) {
            return Some(rule);
        }

        let code = lexed.code.as_str();
        let tautology = self.always_true.captures_iter(code).any(|caps| {
            let left = caps.get(2).map(|m| normalize_operand(m.as_str()));
            let right = caps.get(3).map(|m| normalize_operand(m.as_str()));
            let is_or = caps
                .get(1)
                .is_some_and(|m| m.as_str().eq_ignore_ascii_case("or"));
            is_or && left.is_some() && left == right
        }) || self.always_true_literal.captures_iter(code).any(|caps| {
            match (caps.get(2), caps.get(3)) {
                (Some(a), Some(b)) => {
                    a.as_str().parse::<u64>().ok() > b.as_str().parse::<u64>().ok()
                }
                _ => true,
            }
        }) || self.always_like.captures_iter(code).any(|caps| {
            caps.get(1)
                .and_then(|m| lexed.literal(m.as_str()))
                .is_some_and(|pattern| !pattern.is_empty() && pattern.chars().all(|c| c == '%'))
        });

        tautology.then(|| {
            ValidationVerdict::deny(
                ReasonCode::InjectionSignature,
                Severity::Critical,
                "injection.always_true",
            )
        })
    }

    /// Schemas referenced by qualified identifiers outside literals and comments.
    pub(crate) fn referenced_schemas(&self, query: &str) -> Vec<String> {
        let mut schemas = self.qualified_schemas(&lex(query).code);
        schemas.sort();
        schemas.dedup();
        schemas
    }

    /// Returns every schema-position component of qualified identifiers.
    ///
    /// For `a.b.c` the components `a` and `b` are returned. Quoted names keep
    /// their case; bare names are folded to lowercase.
    fn qualified_schemas(&self, code: &str) -> Vec<String> {
        let mut schemas = Vec::new();
        for chain in self.qualified_chain.find_iter(code) {
            let parts: Vec<String> = self
                .identifier
                .find_iter(chain.as_str())
                .map(|m| unquote(m.as_str()))
                .collect();
            if let Some((_, qualifiers)) = parts.split_last() {
                schemas.extend(qualifiers.iter().cloned());
            }
        }
        schemas
    }
}

fn first_match(rules: &[CompiledRule], text: &str) -> Option<ValidationVerdict> {
    rules
        .iter()
        .find(|rule| rule.regex.is_match(text))
        .map(|rule| ValidationVerdict::deny(rule.reason, rule.severity, rule.id))
}

fn unquote(identifier: &str) -> String {
    match identifier
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => identifier.to_lowercase(),
    }
}

fn normalize_operand(operand: &str) -> String {
    operand.trim_matches('\'').to_lowercase()
}
