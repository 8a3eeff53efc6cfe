//! Invoice and receipt document rendering
//!
//! Produces self-contained HTML documents for the invoice-pdf and receipt
//! functions. The documents are returned as `{ pdf, format: "html" }` so a
//! client can print-to-PDF; no binary PDF generation happens server-side.

use serde::Serialize;

use crate::invoices::InvoiceDetails;
use crate::payments::Payment;

/// A rendered billing document
#[derive(Debug, Clone, Serialize)]
pub struct RenderedDocument {
    pub pdf: String,
    pub format: &'static str,
}

impl RenderedDocument {
    fn html(body: String) -> Self {
        Self {
            pdf: body,
            format: "html",
        }
    }
}

fn format_amount(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!(
        "{}{}.{:02} {}",
        sign,
        abs / 100,
        abs % 100,
        currency.to_uppercase()
    )
}

fn format_quantity(hundredths: i64) -> String {
    if hundredths % 100 == 0 {
        format!("{}", hundredths / 100)
    } else {
        format!("{}.{:02}", hundredths / 100, hundredths % 100)
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const DOCUMENT_STYLE: &str = r#"
body { font-family: Helvetica, Arial, sans-serif; color: #1a1a2e; margin: 40px; }
h1 { font-size: 24px; margin-bottom: 4px; }
.meta { color: #666; font-size: 13px; margin-bottom: 24px; }
table { width: 100%; border-collapse: collapse; margin: 24px 0; }
th { text-align: left; font-size: 12px; text-transform: uppercase; color: #666;
     border-bottom: 2px solid #1a1a2e; padding: 8px 4px; }
td { padding: 8px 4px; border-bottom: 1px solid #e0e0e0; font-size: 14px; }
td.amount, th.amount { text-align: right; }
.totals { margin-left: auto; width: 280px; }
.totals td { border: none; }
.totals .grand td { border-top: 2px solid #1a1a2e; font-weight: bold; }
.status { display: inline-block; padding: 2px 10px; border-radius: 10px;
          font-size: 12px; background: #eef; }
"#;

/// Render a full invoice document with line items and totals.
pub fn render_invoice(details: &InvoiceDetails, client_name: &str) -> RenderedDocument {
    let invoice = &details.invoice;
    let currency = &invoice.currency;

    let mut rows = String::new();
    for item in &details.line_items {
        rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"amount\">{}</td><td class=\"amount\">{}</td><td class=\"amount\">{}</td></tr>\n",
            escape_html(&item.description),
            format_quantity(item.quantity_hundredths),
            format_amount(item.unit_price_cents, currency),
            format_amount(item.total_cents, currency),
        ));
    }

    let mut totals = format!(
        "<tr><td>Subtotal</td><td class=\"amount\">{}</td></tr>\n",
        format_amount(invoice.subtotal_cents, currency)
    );
    if invoice.discount_cents > 0 {
        totals.push_str(&format!(
            "<tr><td>Discount</td><td class=\"amount\">-{}</td></tr>\n",
            format_amount(invoice.discount_cents, currency)
        ));
    }
    if invoice.tax_cents > 0 {
        totals.push_str(&format!(
            "<tr><td>Tax</td><td class=\"amount\">{}</td></tr>\n",
            format_amount(invoice.tax_cents, currency)
        ));
    }
    totals.push_str(&format!(
        "<tr class=\"grand\"><td>Total</td><td class=\"amount\">{}</td></tr>\n",
        format_amount(invoice.total_cents, currency)
    ));
    if details.remaining_cents > 0 && details.remaining_cents < invoice.total_cents {
        totals.push_str(&format!(
            "<tr><td>Balance due</td><td class=\"amount\">{}</td></tr>\n",
            format_amount(details.remaining_cents, currency)
        ));
    }

    let due = invoice
        .due_date
        .map(|d| format!("<div class=\"meta\">Due: {d}</div>"))
        .unwrap_or_default();
    let notes = invoice
        .notes
        .as_deref()
        .map(|n| format!("<p>{}</p>", escape_html(n)))
        .unwrap_or_default();

    let body = format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Invoice {number}</title>
<style>{style}</style></head>
<body>
<h1>Invoice {number}</h1>
<div class="meta">Billed to: {client} <span class="status">{status}</span></div>
{due}
<table>
<thead><tr><th>Description</th><th class="amount">Qty</th><th class="amount">Unit price</th><th class="amount">Amount</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
<table class="totals">
{totals}</table>
{notes}
</body></html>"#,
        number = escape_html(&invoice.invoice_number),
        style = DOCUMENT_STYLE,
        client = escape_html(client_name),
        status = invoice.status.as_str(),
        due = due,
        rows = rows,
        totals = totals,
        notes = notes,
    );

    RenderedDocument::html(body)
}

/// Render a payment receipt referencing its invoice.
pub fn render_receipt(
    payment: &Payment,
    invoice_number: &str,
    client_name: &str,
) -> RenderedDocument {
    let paid_at = payment
        .paid_at
        .map(|t| t.date().to_string())
        .unwrap_or_else(|| payment.created_at.date().to_string());

    let body = format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Receipt for {number}</title>
<style>{style}</style></head>
<body>
<h1>Payment receipt</h1>
<div class="meta">Invoice {number} &middot; {client}</div>
<table>
<thead><tr><th>Date</th><th>Reference</th><th class="amount">Amount</th></tr></thead>
<tbody>
<tr><td>{paid_at}</td><td>{reference}</td><td class="amount">{amount}</td></tr>
</tbody>
</table>
</body></html>"#,
        number = escape_html(invoice_number),
        style = DOCUMENT_STYLE,
        client = escape_html(client_name),
        paid_at = paid_at,
        reference = escape_html(
            payment
                .stripe_payment_intent_id
                .as_deref()
                .unwrap_or("manual payment")
        ),
        amount = format_amount(payment.amount_cents, &payment.currency),
    );

    RenderedDocument::html(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount_variants() {
        assert_eq!(format_amount(125050, "usd"), "1250.50 USD");
        assert_eq!(format_amount(5, "eur"), "0.05 EUR");
        assert_eq!(format_amount(-730, "usd"), "-7.30 USD");
    }

    #[test]
    fn test_format_quantity_drops_whole_fraction() {
        assert_eq!(format_quantity(300), "3");
        assert_eq!(format_quantity(150), "1.50");
        assert_eq!(format_quantity(25), "0.25");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("Design & <review> \"phase\""),
            "Design &amp; &lt;review&gt; &quot;phase&quot;"
        );
    }
}
