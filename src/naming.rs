// Zipshelf - 压缩包命名模块
// 根据命名模板、计数器和当前时间为每个文件生成压缩包名称

use crate::activity::ActivityLog;
use crate::scanner::FileRecord;
use chrono::{DateTime, Local};
use regex::Regex;
use std::borrow::Cow;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// 模板无法使用时的默认模板
pub const DEFAULT_TEMPLATE: &str = "{fecha}_{nombre_original}";

/// 压缩包扩展名
pub const ARCHIVE_EXTENSION: &str = ".zip";

/// 发票号提取规则，按顺序匹配，第一个命中的规则生效
const INVOICE_RULES: [&str; 5] = [
    r"^([A-Z]{3,4}\d{3,6})",  // HOSP001, FACT123
    r"^([A-Z]+\d+)",          // ABC123
    r"^(\d{3,6})",            // 001, 123456
    r"([A-Z]{2,4}-\d{3,6})",  // AB-001, HOSP-123
    r"([A-Z]+_\d+)",          // FACT_001
];

/// 模板解析或渲染错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder: {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),

    #[error("unsupported format spec '{spec}' for {{{field}}}")]
    UnsupportedFormat { field: String, spec: String },

    #[error("template produced an unusable file name: {0:?}")]
    InvalidName(String),
}

/// 模板中可用的变量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Date,
    ShortDate,
    Time,
    Timestamp,
    OriginalName,
    Counter,
    OriginalExtension,
    InvoiceNumber,
}

impl Field {
    fn lookup(key: &str) -> Option<Self> {
        let field = match key {
            "fecha" | "date" => Field::Date,
            "fecha_corta" | "short_date" => Field::ShortDate,
            "hora" | "time" => Field::Time,
            "timestamp" => Field::Timestamp,
            "nombre_original" | "original_name" => Field::OriginalName,
            "contador" | "counter" => Field::Counter,
            "extension_original" | "original_extension" => Field::OriginalExtension,
            "numero_factura" | "invoice_number" => Field::InvoiceNumber,
            _ => return None,
        };
        Some(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field {
        field: Field,
        width: usize,
        zero_pad: bool,
    },
}

/// 编译后的命名模板
///
/// 语法：`{变量}` 或 `{变量:格式}`，格式为 `[0][宽度][d|s]`（如 `{contador:03d}`）；
/// `{{` 与 `}}` 表示字面大括号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = s.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::UnbalancedBrace(pos)),
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(TemplateError::UnbalancedBrace(pos)),
                            c => body.push(c),
                        }
                    }
                    if !closed {
                        return Err(TemplateError::UnbalancedBrace(pos));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(parse_field(&body)?);
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }
}

/// 字段宽度上限，与常见文件系统的文件名长度上限一致
const MAX_FIELD_WIDTH: usize = 255;

fn parse_field(body: &str) -> Result<Segment, TemplateError> {
    let (key, spec) = match body.split_once(':') {
        Some((k, s)) => (k.trim(), Some(s.trim())),
        None => (body.trim(), None),
    };
    let field =
        Field::lookup(key).ok_or_else(|| TemplateError::UnknownPlaceholder(key.to_string()))?;

    let Some(spec) = spec.filter(|s| !s.is_empty()) else {
        return Ok(Segment::Field {
            field,
            width: 0,
            zero_pad: false,
        });
    };

    let bad = || TemplateError::UnsupportedFormat {
        field: key.to_string(),
        spec: spec.to_string(),
    };

    let (digits, kind) = match spec.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&spec[..i], Some(c)),
        _ => (spec, None),
    };
    match kind {
        None | Some('s') => {}
        Some('d') if field == Field::Counter => {}
        _ => return Err(bad()),
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }

    let zero_pad = digits.starts_with('0');
    let width = if digits.is_empty() {
        0
    } else {
        digits.parse().map_err(|_| bad())?
    };
    if width > MAX_FIELD_WIDTH {
        return Err(bad());
    }

    Ok(Segment::Field {
        field,
        width,
        zero_pad,
    })
}

/// 单次渲染使用的变量值
#[derive(Debug, Clone)]
pub struct Variables {
    pub date: String,
    pub short_date: String,
    pub time: String,
    pub timestamp: String,
    pub original_name: String,
    pub counter: u64,
    pub original_extension: String,
    pub invoice_number: String,
}

impl Variables {
    pub fn new(file: &FileRecord, counter: u64, now: DateTime<Local>) -> Self {
        let stem = file.stem();
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            short_date: now.format("%Y%m%d").to_string(),
            time: now.format("%H-%M-%S").to_string(),
            timestamp: now.format("%Y%m%d_%H%M%S").to_string(),
            invoice_number: extract_invoice_number(&stem),
            original_name: stem,
            counter,
            original_extension: file.extension.clone(),
        }
    }
}

impl Template {
    /// 用给定变量渲染模板（不含扩展名）
    pub fn render(&self, vars: &Variables) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            let (field, width, zero_pad) = match seg {
                Segment::Literal(s) => {
                    out.push_str(s);
                    continue;
                }
                Segment::Field {
                    field,
                    width,
                    zero_pad,
                } => (*field, *width, *zero_pad),
            };

            let value: Cow<'_, str> = match field {
                Field::Date => Cow::Borrowed(&vars.date),
                Field::ShortDate => Cow::Borrowed(&vars.short_date),
                Field::Time => Cow::Borrowed(&vars.time),
                Field::Timestamp => Cow::Borrowed(&vars.timestamp),
                Field::OriginalName => Cow::Borrowed(&vars.original_name),
                Field::Counter => Cow::Owned(vars.counter.to_string()),
                Field::OriginalExtension => Cow::Borrowed(&vars.original_extension),
                Field::InvoiceNumber => Cow::Borrowed(&vars.invoice_number),
            };

            // 数字右对齐，文本左对齐
            let padding = width.saturating_sub(value.chars().count());
            let fill = if zero_pad { '0' } else { ' ' };
            if field == Field::Counter {
                out.extend(std::iter::repeat(fill).take(padding));
                out.push_str(&value);
            } else {
                out.push_str(&value);
                out.extend(std::iter::repeat(fill).take(padding));
            }
        }
        out
    }
}

/// 解析并渲染模板，检查结果是否可作为文件名
fn try_render(template: &str, vars: &Variables) -> Result<String, TemplateError> {
    let name = template.parse::<Template>()?.render(vars);
    if name.trim().is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(TemplateError::InvalidName(name));
    }
    Ok(name)
}

/// 为文件生成压缩包名称
///
/// 模板有误时记录警告并改用默认模板 `{fecha}_{nombre_original}`，不会返回错误。
/// 仅在模板成功渲染时将 `counter` 加一。
///
/// # 参数
/// * `file` - 源文件记录
/// * `template` - 命名模板
/// * `counter` - 本次运行的计数器，由调用方持有
/// * `now` - 用于日期类变量的时间
/// * `log` - 活动日志
///
/// # 返回
/// 带 `.zip` 扩展名的文件名
pub fn generate_name(
    file: &FileRecord,
    template: &str,
    counter: &mut u64,
    now: DateTime<Local>,
    log: &ActivityLog,
) -> String {
    let vars = Variables::new(file, *counter, now);

    let base = match try_render(template, &vars) {
        Ok(name) => {
            *counter += 1;
            name
        }
        Err(e) => {
            log.warning(
                format!("naming pattern error, using default pattern: {}", e),
                Some(&file.path),
            );
            format!("{}_{}", vars.date, vars.original_name)
        }
    };

    format!("{}{}", base, ARCHIVE_EXTENSION)
}

/// 预览一组文件将得到的压缩包名称，不修改磁盘也不影响调用方的计数器
pub fn preview_names(
    files: &[FileRecord],
    template: &str,
    counter_start: u64,
    now: DateTime<Local>,
    log: &ActivityLog,
) -> Vec<(String, String)> {
    let mut counter = counter_start;
    files
        .iter()
        .map(|f| {
            let name = generate_name(f, template, &mut counter, now, log);
            (f.name.clone(), name)
        })
        .collect()
}

fn invoice_rules() -> &'static [Regex] {
    static RULES: OnceLock<Vec<Regex>> = OnceLock::new();
    RULES.get_or_init(|| {
        INVOICE_RULES
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// 从文件名中提取发票号（启发式）
///
/// 规则作用于大写后的文件名，第一个命中的规则生效；都不命中时原样返回。
/// 含义模糊的名称可能被误判。
pub fn extract_invoice_number(stem: &str) -> String {
    let upper = stem.to_uppercase();
    invoice_rules()
        .iter()
        .find_map(|re| re.captures(&upper).and_then(|c| c.get(1)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn record(name: &str) -> FileRecord {
        let path = PathBuf::from("/data").join(name);
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        FileRecord {
            path,
            name: name.to_string(),
            size: 10,
            modified: SystemTime::UNIX_EPOCH,
            extension,
            readable: true,
            writable: true,
        }
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 12, 5, 7).unwrap()
    }

    #[test]
    fn original_name_only() {
        let mut counter = 1;
        let name = generate_name(
            &record("invoice.pdf"),
            "{nombre_original}",
            &mut counter,
            noon(),
            &ActivityLog::new(),
        );
        assert_eq!(name, "invoice.zip");
        assert_eq!(counter, 2);
    }

    #[test]
    fn date_and_time_placeholders() {
        let mut counter = 1;
        let log = ActivityLog::new();
        let f = record("scan.PDF");
        assert_eq!(
            generate_name(&f, "{fecha}_{nombre_original}", &mut counter, noon(), &log),
            "2024-03-09_scan.zip"
        );
        let short = "{fecha_corta}-{hora}{extension_original}";
        assert_eq!(
            generate_name(&f, short, &mut counter, noon(), &log),
            "20240309-12-05-07.pdf.zip"
        );
        assert_eq!(
            generate_name(&f, "{timestamp}_{original_name}", &mut counter, noon(), &log),
            "20240309_120507_scan.zip"
        );
    }

    #[test]
    fn counter_padding_and_monotonic() {
        let mut counter = 7;
        let log = ActivityLog::new();
        let template = "{contador:03d}_{nombre_original}";
        let names: Vec<String> = ["a.txt", "b.txt", "c.txt"]
            .iter()
            .map(|n| generate_name(&record(n), template, &mut counter, noon(), &log))
            .collect();
        assert_eq!(names, vec!["007_a.zip", "008_b.zip", "009_c.zip"]);
        assert_eq!(counter, 10);
    }

    #[test]
    fn unknown_placeholder_falls_back_without_counting() {
        let mut counter = 3;
        let name = generate_name(
            &record("memo.docx"),
            "{cliente}_{nombre_original}",
            &mut counter,
            noon(),
            &ActivityLog::new(),
        );
        assert_eq!(name, "2024-03-09_memo.zip");
        assert_eq!(counter, 3);
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert_eq!(
            "{fecha".parse::<Template>(),
            Err(TemplateError::UnbalancedBrace(0))
        );
        assert_eq!(
            "x}".parse::<Template>(),
            Err(TemplateError::UnbalancedBrace(1))
        );
        assert!(matches!(
            "{nombre_original:03d}".parse::<Template>(),
            Err(TemplateError::UnsupportedFormat { .. })
        ));
        assert!("{{literal}}_{fecha}".parse::<Template>().is_ok());
    }

    #[test]
    fn oversized_width_falls_back_to_default() {
        assert!("{contador:0255}".parse::<Template>().is_ok());
        assert!(matches!(
            "{contador:0256}".parse::<Template>(),
            Err(TemplateError::UnsupportedFormat { .. })
        ));

        let mut counter = 1;
        let name = generate_name(
            &record("x.txt"),
            "{contador:0300000000}",
            &mut counter,
            noon(),
            &ActivityLog::new(),
        );
        assert_eq!(name, "2024-03-09_x.zip");
        assert_eq!(counter, 1);
    }

    #[test]
    fn separators_in_result_fall_back() {
        let mut counter = 1;
        let name = generate_name(
            &record("a.txt"),
            "sub/{nombre_original}",
            &mut counter,
            noon(),
            &ActivityLog::new(),
        );
        assert_eq!(name, "2024-03-09_a.zip");
    }

    #[test]
    fn escaped_braces_render_literally() {
        let t: Template = "{{x}}{nombre_original}".parse().unwrap();
        let vars = Variables::new(&record("doc.txt"), 1, noon());
        assert_eq!(t.render(&vars), "{x}doc");
    }

    // 发票号提取是启发式的，这里只覆盖常见格式
    #[test]
    fn invoice_number_best_effort() {
        assert_eq!(extract_invoice_number("HOSP001"), "HOSP001");
        assert_eq!(extract_invoice_number("fact123_scan"), "FACT123");
        assert_eq!(extract_invoice_number("001"), "001");
        assert_eq!(extract_invoice_number("x AB-001"), "AB-001");
        assert_eq!(extract_invoice_number("doc HOSP_123"), "HOSP_123");
        assert_eq!(
            extract_invoice_number("documento_sin_patron"),
            "documento_sin_patron"
        );
    }

    #[test]
    fn preview_does_not_touch_caller_counter() {
        let files = vec![record("a.txt"), record("b.txt")];
        let template = "{contador}-{nombre_original}";
        let preview = preview_names(&files, template, 1, noon(), &ActivityLog::new());
        assert_eq!(
            preview,
            vec![
                ("a.txt".to_string(), "1-a.zip".to_string()),
                ("b.txt".to_string(), "2-b.zip".to_string())
            ]
        );
    }
}
