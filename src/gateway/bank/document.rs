//! WSBCC documents and the BCCExecute envelope
//!
//! Requests are fixed-tag documents under `<WSBCC>` with an `ENCABEZADO`
//! (entity) and a `DETALLE` (operation fields). Replies carry the same shape;
//! only leaf text is ever read back, so a tag lookup is enough.

/// Service namespace of the single SOAP operation
pub const SERVICE_NAMESPACE: &str = "http://bccservice.coopcentral.com/";

const XML_PROLOG: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>"#;

/// Internal transfer between accounts of the same entity
const OPERATION_TYPE_INTERNAL: &str = "03";
/// Status query operation type
const OPERATION_TYPE_STATUS: &str = "3";
const CHANNEL_WEB: &str = "05";
const NO_COMMISSION: &str = "0";

/// One side of an internal transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountParty {
    pub account: String,
    pub document: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDocument {
    pub origin_operation: String,
    pub source: AccountParty,
    pub target: AccountParty,
    pub description: String,
    /// Amount with the decimal point removed (`100.50` → `10050`)
    pub unscaled_amount: String,
    /// Our idempotency key; the bank deduplicates on it
    pub external_id: String,
}

fn document(entity: &str, fields: &[(&str, &str)]) -> String {
    let mut doc = String::with_capacity(256);
    doc.push_str("<WSBCC>\n<ENCABEZADO>\n");
    push_field(&mut doc, "ENTIDAD", entity);
    doc.push_str("</ENCABEZADO>\n<DETALLE>\n");
    for (tag, value) in fields {
        push_field(&mut doc, tag, value);
    }
    doc.push_str("</DETALLE>\n</WSBCC>");
    doc
}

fn push_field(doc: &mut String, tag: &str, value: &str) {
    doc.push('<');
    doc.push_str(tag);
    doc.push('>');
    doc.push_str(&escape(value));
    doc.push_str("</");
    doc.push_str(tag);
    doc.push_str(">\n");
}

pub fn account_check(entity: &str, account: &str, document_type: &str, document_number: &str) -> String {
    document(
        entity,
        &[
            ("CUENTA", account),
            ("TIPODOCCLI", document_type),
            ("DOCCLI", document_number),
        ],
    )
}

pub fn balance_check(entity: &str, account: &str) -> String {
    document(entity, &[("CUENTA", account)])
}

pub fn create_transaction(entity: &str, transfer: &TransferDocument) -> String {
    document(
        entity,
        &[
            ("ORIGOPER", &transfer.origin_operation),
            ("PRODORIG", &transfer.source.account),
            ("DOCPRODORIG", &transfer.source.document),
            ("NOMORIG", &transfer.source.name),
            ("PRODDEST", &transfer.target.account),
            ("DOCPRODDEST", &transfer.target.document),
            ("NOMDEST", &transfer.target.name),
            ("DESCRIPTX", &transfer.description),
            ("VALORTX", &transfer.unscaled_amount),
            ("IDTXENTIDAD", &transfer.external_id),
            ("TIPOOPERTX", OPERATION_TYPE_INTERNAL),
            ("VCOMITX", NO_COMMISSION),
            ("TPROC", CHANNEL_WEB),
        ],
    )
}

pub fn transaction_status(entity: &str, external_id: &str) -> String {
    document(
        entity,
        &[
            ("IDTXENTIDAD", external_id),
            ("TIPOOPERTX", OPERATION_TYPE_STATUS),
        ],
    )
}

/// `BCCExecute` body; input document and password are sealed by the caller
pub fn envelope(entity: &str, sealed_input: &str, sealed_password: &str, product: u32, user: &str) -> String {
    format!(
        concat!(
            r#"<bcc:BCCExecute xmlns:bcc="{ns}">"#,
            "<input>",
            "<entity>{entity}</entity>",
            "<inputXML>{input}</inputXML>",
            "<password>{password}</password>",
            "<product>{product}</product>",
            "<user>{user}</user>",
            "</input>",
            "</bcc:BCCExecute>"
        ),
        ns = SERVICE_NAMESPACE,
        entity = escape(entity),
        input = sealed_input,
        password = sealed_password,
        product = product,
        user = escape(user),
    )
}

pub fn strip_prolog(doc: &str) -> &str {
    doc.trim_start().strip_prefix(XML_PROLOG).unwrap_or(doc).trim()
}

/// Text of the first `<tag>` element; `<tag/>` reads as empty
pub fn tag_text(doc: &str, tag: &str) -> Option<String> {
    if doc.contains(&format!("<{}/>", tag)) && !doc.contains(&format!("<{}>", tag)) {
        return Some(String::new());
    }
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = doc.find(&open)? + open.len();
    let len = doc[start..].find(&close)?;
    Some(unescape(doc[start..start + len].trim()))
}

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Human label of a client document type code
pub fn document_type_label(code: &str) -> &'static str {
    match code {
        "C" => "CC",
        "E" => "CE",
        "P" => "PA",
        "U" => "NUIP",
        "T" => "TI",
        "N" => "NIT",
        _ => "OTR",
    }
}
