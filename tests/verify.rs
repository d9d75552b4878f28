mod common;

use common::MockLookup;
use mtadkim::{
    encode_base64,
    key::{KeyError, PublicKey},
    verifier::{self, Verdict, VerifierError},
    Message, SignatureContext, SignatureError,
};
use std::io::ErrorKind;

const NOW: u64 = 1700000000;

// The corrected RFC 6376 example message (errata 3192): rsa-sha256,
// simple/simple, signed with the 1024-bit example key.
const SIGNED_MESSAGE: &str = "\
DKIM-Signature: a=rsa-sha256; bh=2jUSOH9NhtVGCQWNr9BrIAPreKQjO6Sn7XIkfJVOzv8=;
 c=simple/simple; d=example.com;
 h=Received:From:To:Subject:Date:Message-ID; i=joe@football.example.com;
 s=newengland; t=1615825284; v=1;
 b=Xh4Ujb2wv5x54gXtulCiy4C0e+plRm6pZ4owF+kICpYzs/8WkTVIDBrzhJP0DAYCpnL62T0G
 k+0OH8pi/yqETVjKtKk+peMnNvKkut0GeWZMTze0bfq3/JUK3Ln3jTzzpXxrgVnvBxeY9EZIL4g
 s4wwFRRKz/1bksZGSjD8uuSU=
Received: from client1.football.example.com  [192.0.2.1]
      by submitserver.example.com with SUBMISSION;
      Fri, 11 Jul 2003 21:01:54 -0700 (PDT)
From: Joe SixPack <joe@football.example.com>
To: Suzie Q <suzie@shopping.example.net>
Subject: Is dinner ready?
Date: Fri, 11 Jul 2003 21:00:37 -0700 (PDT)
Message-ID: <20030712040037.46341.5F8J@football.example.com>

Hi.

We lost the game. Are you hungry yet?

Joe.
";

const RSA_KEY: &str = "MIGJAoGBALVI635dLK4cJJAH3Lx6upo3X/Lm1tQz3mezcWTA3BUBnyIsdnRf57aD5BtNmhPrYYDlWlzw3UgnKisIxktkk5+iMQMlFtAS10JB8L3YadXNJY+JBcbeSi5TgJe4WFzNgW95FWDAuSTRXSWZfA/8xjflbTLDx0euFZOM7C4T0GwLAgMBAAE=";

fn message_bytes() -> Vec<u8> {
    SIGNED_MESSAGE.replace('\n', "\r\n").into_bytes()
}

fn resolver() -> MockLookup {
    MockLookup::new(|name| {
        Box::pin(async move {
            match name {
                "newengland._domainkey.example.com" => {
                    Ok(vec![Ok(format!("v=DKIM1; k=rsa; p={RSA_KEY}").into_bytes())])
                }
                _ => Err(ErrorKind::NotFound.into()),
            }
        })
    })
}

#[tokio::test]
async fn verify_signed_message() {
    let _ = tracing_subscriber::fmt::try_init();

    let raw = message_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].verdict, Verdict::Continue);
    assert_eq!(outcomes[0].error, None);
    assert_eq!(outcomes[0].domain.as_deref(), Some("example.com"));
    assert_eq!(outcomes[0].selector.as_deref(), Some("newengland"));
}

#[tokio::test]
async fn modified_body_is_rejected_before_rsa() {
    let _ = tracing_subscriber::fmt::try_init();

    let raw = SIGNED_MESSAGE
        .replace("hungry", "thirsty")
        .replace('\n', "\r\n")
        .into_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Reject);
    // reported as a body hash mismatch, not a signature failure
    assert_eq!(outcomes[0].error, Some(VerifierError::BodyHashMismatch));
}

#[tokio::test]
async fn modified_signed_header_fails_rsa() {
    let raw = SIGNED_MESSAGE
        .replace("Is dinner ready?", "Is dinner ready??")
        .replace('\n', "\r\n")
        .into_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Reject);
    assert_eq!(outcomes[0].error, Some(VerifierError::BadSignature));
}

#[tokio::test]
async fn missing_body_hash_fails_without_lookup() {
    let resolver = MockLookup::new(|_| Box::pin(async { panic!("no DNS query expected") }));

    let raw = b"DKIM-Signature: v=1; a=rsa-sha256; d=example.com; s=sel;\r\n\
        \th=From; b=AAAA\r\n\
        From: alice@example.com\r\n\r\nbody\r\n"
        .to_vec();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver, &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Permfail);
    assert_eq!(
        outcomes[0].error,
        Some(VerifierError::Signature(SignatureError::MissingBodyHash))
    );
}

#[tokio::test]
async fn revoked_key() {
    let resolver = MockLookup::new(|_| {
        Box::pin(async { Ok(vec![Ok(b"v=DKIM1; p=".to_vec())]) })
    });

    let raw = message_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver, &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Permfail);
    assert_eq!(outcomes[0].error, Some(VerifierError::Key(KeyError::Revoked)));
}

#[tokio::test]
async fn no_key_record_is_permanent() {
    let resolver = MockLookup::new(|_| Box::pin(async { Err(ErrorKind::NotFound.into()) }));

    let raw = message_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver, &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Permfail);
    assert_eq!(
        outcomes[0].error,
        Some(VerifierError::Key(KeyError::NoKey(ErrorKind::NotFound)))
    );
}

#[tokio::test]
async fn lookup_timeout_is_transient() {
    let resolver = MockLookup::new(|_| Box::pin(async { Err(ErrorKind::TimedOut.into()) }));

    let raw = message_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver, &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Tempfail);
    assert_eq!(
        outcomes[0].error,
        Some(VerifierError::Key(KeyError::NoKey(ErrorKind::TimedOut)))
    );
}

#[tokio::test]
async fn first_usable_key_wins() {
    let resolver = MockLookup::new(|_| {
        Box::pin(async {
            Ok(vec![
                Ok(b"not a key record".to_vec()),
                Ok(format!("v=DKIM1; k=rsa; p={RSA_KEY}").into_bytes()),
            ])
        })
    });

    let raw = message_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver, &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Continue);
}

#[tokio::test]
async fn multiple_signatures_verified_independently() {
    let raw = format!(
        "DKIM-Signature: v=2; a=rsa-sha256; d=example.com; s=sel; h=From;\n{SIGNED_MESSAGE}"
    )
    .replace('\n', "\r\n")
    .into_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].verdict, Verdict::Permfail);
    assert_eq!(
        outcomes[0].error,
        Some(VerifierError::Signature(SignatureError::VersionInvalid))
    );
    assert_eq!(outcomes[1].verdict, Verdict::Continue);
}

// A relaxed/relaxed signature whose bh= matches the body but whose b= is
// garbage: the failure must come from the RSA step, proving the relaxed
// body canonicalization produced the recorded digest.
#[tokio::test]
async fn relaxed_body_hash_accepted() {
    let signature = format!(
        "v=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=newengland; h=From; \
         bh=2jUSOH9NhtVGCQWNr9BrIAPreKQjO6Sn7XIkfJVOzv8=; b={}",
        encode_base64([0u8; 128])
    );
    let raw = format!(
        "DKIM-Signature: {signature}\r\nFrom: Joe <joe@example.com>\r\n\r\n\
         Hi.\r\n\r\nWe lost the game.  Are you hungry yet?\r\n\r\nJoe.\r\n"
    )
    .into_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes[0].verdict, Verdict::Reject);
    assert_eq!(outcomes[0].error, Some(VerifierError::BadSignature));
}

#[tokio::test]
async fn body_length_limits_hashing() {
    // l= larger than the body commits the whole body
    let signature = format!(
        "v=1; a=rsa-sha256; c=relaxed/relaxed; d=example.com; s=newengland; h=From; l=200; \
         bh=2jUSOH9NhtVGCQWNr9BrIAPreKQjO6Sn7XIkfJVOzv8=; b={}",
        encode_base64([0u8; 128])
    );
    let raw = format!(
        "DKIM-Signature: {signature}\r\nFrom: Joe <joe@example.com>\r\n\r\n\
         Hi.\r\n\r\nWe lost the game.  Are you hungry yet?\r\n\r\nJoe.\r\n"
    )
    .into_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes[0].error, Some(VerifierError::BadSignature));
}

#[tokio::test]
async fn body_length_zero_commits_empty_body() {
    // an empty committed body hashes as a lone CRLF
    let signature = format!(
        "v=1; a=rsa-sha256; c=simple/simple; d=example.com; s=newengland; h=From; l=0; \
         bh=frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY=; b={}",
        encode_base64([0u8; 128])
    );
    let raw = format!(
        "DKIM-Signature: {signature}\r\nFrom: Joe <joe@example.com>\r\n\r\nsome body text\r\n"
    )
    .into_bytes();
    let message = Message::parse(&raw);

    let outcomes = verifier::verify_message_at(&resolver(), &message, NOW).await;

    assert_eq!(outcomes[0].error, Some(VerifierError::BadSignature));
}

#[test]
fn checking_against_wrong_message_is_record_error() {
    let signature = format!(
        "v=1; a=rsa-sha256; d=example.com; s=newengland; h=From; \
         bh=frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY=; b={}",
        encode_base64([0u8; 128])
    );
    let ctx = SignatureContext::parse(&signature, NOW).unwrap();
    let key = PublicKey::from_record_data(RSA_KEY).unwrap();

    let message = Message::parse(b"From: alice@example.com\r\n\r\n\r\n");

    let error = verifier::check(ctx, &key, &message).unwrap_err();

    assert_eq!(error, VerifierError::SignatureHeaderMissing);
    assert_eq!(error.verdict(), Verdict::RecordError);
}
