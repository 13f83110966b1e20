//! Raw message builders.

#![allow(dead_code)]

/// A minimal trade confirmation with the given Message-ID.
pub fn confirmation(message_id: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: Broker Notifications <notify@broker.example>\r\n\
         To: investor@example.com\r\n\
         Subject: {subject}\r\n\
         Message-ID: <{message_id}>\r\n\
         Date: Tue, 5 Mar 2024 14:30:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {subject}\r\n"
    )
    .into_bytes()
}

/// Message ids `prefix-1` .. `prefix-n`.
pub fn message_ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{}-{}", prefix, i)).collect()
}
