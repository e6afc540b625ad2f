//! 订单字段抽取
//!
//! 用固定的 JSON schema（schemars 生成）要求 LLM 从指令中抽取订单字段；
//! parse_extraction 从回复中取出 JSON 块并解析，失败即 ExtractionParse。

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::ProcureError;
use crate::memory::Message;

/// 订单字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderField {
    Item,
    Quantity,
    VendorName,
    VendorEmail,
    Price,
}

impl OrderField {
    /// 起草前必须具备的字段（按提示顺序）
    pub const REQUIRED: [OrderField; 3] =
        [OrderField::Item, OrderField::Quantity, OrderField::VendorEmail];

    pub fn label(self) -> &'static str {
        match self {
            OrderField::Item => "Item",
            OrderField::Quantity => "Quantity",
            OrderField::VendorName => "Vendor name",
            OrderField::VendorEmail => "Vendor email",
            OrderField::Price => "Price",
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// LLM 抽取结果；未提及的字段为 null
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedOrder {
    /// Product or service to buy
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub item: Option<String>,
    /// Quantity, including unit if given (e.g. "100" or "100 pallets")
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub quantity: Option<String>,
    /// Supplier / vendor name
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub vendor_name: Option<String>,
    /// Supplier / vendor email address
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub vendor_email: Option<String>,
    /// Agreed or expected price, null if unknown
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub price: Option<String>,
    /// Preferred delivery date, null if not given
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub delivery_date: Option<String>,
    /// Shipping address, null if not given
    #[serde(default, deserialize_with = "text_or_number")]
    #[schemars(with = "Option<String>")]
    pub shipping_address: Option<String>,
    /// True when item, quantity or vendor_email is missing
    #[serde(default)]
    pub needs_info: bool,
}

/// 接受字符串或数字；空白字符串视为缺失
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl ExtractedOrder {
    /// 缺失的必填字段；vendor_email 不像邮箱地址时也算缺失
    pub fn missing_required(&self) -> Vec<OrderField> {
        OrderField::REQUIRED
            .into_iter()
            .filter(|field| match field {
                OrderField::Item => self.item.is_none(),
                OrderField::Quantity => self.quantity.is_none(),
                OrderField::VendorEmail => !self
                    .vendor_email
                    .as_deref()
                    .map(looks_like_email)
                    .unwrap_or(false),
                _ => false,
            })
            .collect()
    }
}

pub(crate) fn looks_like_email(s: &str) -> bool {
    let s = s.trim();
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// 抽取用的 system prompt：只输出符合 schema 的 JSON
pub fn extraction_messages(instruction: &str) -> Vec<Message> {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(ExtractedOrder))
        .unwrap_or_else(|_| "{}".to_string());
    let system = format!(
        "You extract purchase order details from a procurement request.\n\
         Output ONLY one JSON object matching this schema, no prose, no Markdown:\n{schema}\n\
         Use null for anything the request does not state. Never invent an email address."
    );
    vec![Message::system(system), Message::user(instruction.to_string())]
}

/// 从 LLM 输出中取 JSON（```json 代码块或首个 { 到最后一个 }）并解析
pub fn parse_extraction(output: &str) -> Result<ExtractedOrder, ProcureError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end < start {
            return Err(ProcureError::ExtractionParse(trimmed.to_string()));
        }
        &trimmed[start..=end]
    } else {
        return Err(ProcureError::ExtractionParse(trimmed.to_string()));
    };

    serde_json::from_str(json_str)
        .map_err(|e| ProcureError::ExtractionParse(format!("{}: {}", e, json_str)))
}
