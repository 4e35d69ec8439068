//! Transactional email bodies for the order lifecycle.

use crate::models::Order;

pub struct EmailMessage {
    pub subject: &'static str,
    pub html: String,
}

pub fn order_placed(order: &Order) -> EmailMessage {
    EmailMessage {
        subject: "Order Confirmation - Your Order Has Been Placed",
        html: format!(
            "<h2>Thank you for your order!</h2>\
             <p>Your order ID: <strong>{}</strong></p>\
             <p>Total Price: <strong>{} {}</strong></p>\
             <p>We will notify you once your order is shipped.</p>",
            order.id,
            order.total_price,
            order.currency.to_ascii_uppercase()
        ),
    }
}

pub fn payment_received(order: &Order) -> EmailMessage {
    EmailMessage {
        subject: "Payment Confirmation - Your Order Has Been Paid",
        html: format!(
            "<h2>Your payment was successful!</h2>\
             <p>Your order ID: <strong>{}</strong></p>\
             <p>Total Price: <strong>{} {}</strong></p>\
             <p>Thank you for your purchase!</p>",
            order.id,
            order.total_price,
            order.currency.to_ascii_uppercase()
        ),
    }
}
