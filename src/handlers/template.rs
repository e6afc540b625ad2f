//! 采购单模板
//!
//! 主题固定为 "Purchase Order Request"；价格缺失时请求报价，交期缺省 ASAP，收货地址缺省取配置。
//! 草稿以固定标记包裹（DRAFT_BEGIN / DRAFT_END），监督者据此从历史中取回收件人、主题与正文。

use crate::config::PurchaseSection;
use crate::core::ProcureError;
use crate::handlers::ExtractedOrder;

pub const PURCHASE_ORDER_SUBJECT: &str = "Purchase Order Request";
pub const DRAFT_BEGIN: &str = "--- DRAFT EMAIL ---";
pub const DRAFT_END: &str = "-------------------";
pub const DRAFT_QUESTION: &str =
    "Does this look correct? Reply \"yes\" to send it, \"cancel\" to discard it, or tell me what to change.";

/// 已起草的采购单
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseDraft {
    pub item: String,
    pub quantity: String,
    pub vendor_name: Option<String>,
    pub vendor_email: String,
    pub price: Option<String>,
    pub delivery_date: String,
    pub shipping_address: String,
}

impl PurchaseDraft {
    /// 必填字段齐全才能生成草稿；否则返回 MissingField（列出全部缺失项）
    pub fn from_order(order: ExtractedOrder, defaults: &PurchaseSection) -> Result<Self, ProcureError> {
        let missing = order.missing_required();
        if !missing.is_empty() {
            return Err(ProcureError::MissingField(missing));
        }
        let (Some(item), Some(quantity), Some(vendor_email)) =
            (order.item, order.quantity, order.vendor_email)
        else {
            return Err(ProcureError::MissingField(Vec::new()));
        };
        Ok(Self {
            item,
            quantity,
            vendor_name: order.vendor_name,
            vendor_email: vendor_email.trim().to_string(),
            price: order.price,
            delivery_date: order
                .delivery_date
                .unwrap_or_else(|| defaults.default_delivery_date.clone()),
            shipping_address: order
                .shipping_address
                .unwrap_or_else(|| defaults.default_shipping_address.clone()),
        })
    }

    pub fn subject(&self) -> &'static str {
        PURCHASE_ORDER_SUBJECT
    }

    /// 渲染邮件正文
    pub fn body(&self, signature: &PurchaseSection) -> String {
        let greeting = self.vendor_name.as_deref().unwrap_or("Supplier");
        let price = self
            .price
            .as_deref()
            .unwrap_or("Please provide a quote");

        let mut body = format!(
            "Dear {greeting},\n\n\
             I hope this message finds you well. We are pleased to place a new purchase order with your company. \
             Below are the details of our order:\n\
             - Product/Service: {item}\n\
             - Quantity: {quantity}\n\
             - Price: {price}\n\
             - Delivery Date: {delivery}\n\
             - Shipping Address: {address}\n\n\
             Please confirm the receipt of this purchase order and provide an estimated delivery date.\n\
             We look forward to continuing our successful partnership.\n\n\
             Best regards,\n{name}\n{position}\n{company}",
            item = self.item,
            quantity = self.quantity,
            delivery = self.delivery_date,
            address = self.shipping_address,
            name = signature.signer_name,
            position = signature.signer_position,
            company = signature.company_name,
        );
        if !signature.contact.trim().is_empty() {
            body.push('\n');
            body.push_str(signature.contact.trim());
        }
        body
    }

    pub fn to_email(&self, signature: &PurchaseSection) -> DraftEmail {
        DraftEmail {
            recipient: self.vendor_email.clone(),
            subject: self.subject().to_string(),
            body: self.body(signature),
        }
    }
}

/// 一封完整的草稿邮件（收件人 / 主题 / 正文）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEmail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl DraftEmail {
    /// 草稿块 + 确认提问，整段原样展示给用户
    pub fn render(&self) -> String {
        format!(
            "{DRAFT_BEGIN}\nTo: {}\nSubject: {}\n\n{}\n{DRAFT_END}\n{DRAFT_QUESTION}",
            self.recipient, self.subject, self.body
        )
    }

    /// 从文本中取最后一个草稿块；格式不完整时返回 None
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.rfind(DRAFT_BEGIN)? + DRAFT_BEGIN.len();
        let mut lines = text[start..].lines().skip_while(|l| l.trim().is_empty());

        let recipient = lines.next()?.strip_prefix("To:")?.trim().to_string();
        let subject = lines.next()?.strip_prefix("Subject:")?.trim().to_string();

        let mut body_lines = Vec::new();
        let mut closed = false;
        for line in lines {
            if line.trim_end() == DRAFT_END {
                closed = true;
                break;
            }
            body_lines.push(line);
        }
        if !closed || recipient.is_empty() {
            return None;
        }
        let body = body_lines.join("\n").trim().to_string();
        Some(Self {
            recipient,
            subject,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> ExtractedOrder {
        ExtractedOrder {
            item: Some("red bricks".into()),
            quantity: Some("5000".into()),
            vendor_name: Some("Bob".into()),
            vendor_email: Some("bob@brickco.com".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let draft = PurchaseDraft::from_order(order(), &PurchaseSection::default()).unwrap();
        assert_eq!(draft.delivery_date, "ASAP");
        assert_eq!(draft.shipping_address, "123 Construction Lane");

        let body = draft.body(&PurchaseSection::default());
        assert!(body.starts_with("Dear Bob,"));
        assert!(body.contains("- Product/Service: red bricks"));
        assert!(body.contains("- Quantity: 5000"));
        assert!(body.contains("- Price: Please provide a quote"));
        assert!(body.contains("- Delivery Date: ASAP"));
        assert!(body.contains("- Shipping Address: 123 Construction Lane"));
    }

    #[test]
    fn test_missing_required_blocks_draft() {
        let mut o = order();
        o.vendor_email = None;
        match PurchaseDraft::from_order(o, &PurchaseSection::default()) {
            Err(ProcureError::MissingField(fields)) => {
                assert_eq!(fields, vec![crate::handlers::OrderField::VendorEmail])
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_render_then_parse_recovers_email() {
        let email = PurchaseDraft::from_order(order(), &PurchaseSection::default())
            .unwrap()
            .to_email(&PurchaseSection::default());
        let shown = format!("Here is the draft:\n{}", email.render());
        assert_eq!(DraftEmail::parse(&shown), Some(email));
    }

    #[test]
    fn test_parse_rejects_unterminated_block() {
        let text = format!("{DRAFT_BEGIN}\nTo: a@b.com\nSubject: x\n\nbody without end");
        assert_eq!(DraftEmail::parse(&text), None);
        assert_eq!(DraftEmail::parse("no draft here"), None);
    }
}
