//! Printable rendition of a fully signed contract.

mod labels;

use std::{fmt::Write as _, str::FromStr};

use atelier_core::{Contract, ContractState, PaymentMethod, ParseEnumError, Signature};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use labels::Labels;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ar,
}

impl FromStr for Locale {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "ar" => Ok(Self::Ar),
            _ => Err(ParseEnumError::new("locale", value)),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("contract {contract_number} is not fully signed (state {state})")]
    NotFullySigned {
        contract_number: String,
        state: ContractState,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Party {
    pub name: String,
    pub email: String,
}

/// Display details of the people on the contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentParties {
    pub client: Party,
    pub affiliate: Option<Party>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Signer {
    Agency,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureBlock {
    pub signer: Signer,
    pub signed_at: DateTime<Utc>,
    /// Hex SHA-256 of the signature payload.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractDocument {
    pub locale: Locale,
    pub contract_number: String,
    pub title: String,
    pub parties: DocumentParties,
    pub currency: String,
    pub total_amount: Decimal,
    pub deposit_amount: Decimal,
    pub remaining_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub terms: Vec<String>,
    pub signatures: Vec<SignatureBlock>,
    /// When the last signature landed.
    pub effective_at: DateTime<Utc>,
}

pub fn render_contract(
    contract: &Contract,
    parties: DocumentParties,
    locale: Locale,
) -> Result<ContractDocument, DocumentError> {
    let (Some(admin), Some(client)) = (&contract.admin_signature, &contract.client_signature)
    else {
        return Err(DocumentError::NotFullySigned {
            contract_number: contract.contract_number.clone(),
            state: contract.state,
        });
    };

    Ok(ContractDocument {
        locale,
        contract_number: contract.contract_number.clone(),
        title: contract.title.clone(),
        parties,
        currency: contract.currency.clone(),
        total_amount: contract.total_amount,
        deposit_amount: contract.deposit_amount,
        remaining_amount: contract.remaining_amount,
        payment_method: contract.payment_method,
        terms: contract.terms.clone(),
        signatures: vec![
            signature_block(Signer::Agency, admin),
            signature_block(Signer::Client, client),
        ],
        effective_at: admin.signed_at.max(client.signed_at),
    })
}

fn signature_block(signer: Signer, signature: &Signature) -> SignatureBlock {
    SignatureBlock {
        signer,
        signed_at: signature.signed_at,
        fingerprint: sha256_hex(&signature.data),
    }
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ContractDocument {
    /// Plain-text layout with labels in the document's locale.
    pub fn to_text(&self) -> String {
        let labels = Labels::for_locale(self.locale);
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.title);
        let _ = writeln!(out, "{}: {}", labels.contract_number, self.contract_number);
        let _ = writeln!(
            out,
            "{}: {}",
            labels.effective_date,
            self.effective_at.format("%Y-%m-%d")
        );

        let _ = writeln!(out, "\n{}", labels.parties);
        let client = &self.parties.client;
        let _ = writeln!(out, "  {}: {} <{}>", labels.client, client.name, client.email);
        if let Some(affiliate) = &self.parties.affiliate {
            let _ = writeln!(
                out,
                "  {}: {} <{}>",
                labels.affiliate, affiliate.name, affiliate.email
            );
        }

        let _ = writeln!(out, "\n{}", labels.amounts);
        for (label, amount) in [
            (labels.total, self.total_amount),
            (labels.deposit, self.deposit_amount),
            (labels.remaining, self.remaining_amount),
        ] {
            let _ = writeln!(out, "  {label}: {amount:.2} {}", self.currency);
        }
        let _ = writeln!(
            out,
            "  {}: {}",
            labels.payment_method,
            labels.payment_method_name(self.payment_method)
        );

        if !self.terms.is_empty() {
            let _ = writeln!(out, "\n{}", labels.terms);
            for (index, term) in self.terms.iter().enumerate() {
                let _ = writeln!(out, "  {}. {term}", index + 1);
            }
        }

        let _ = writeln!(out, "\n{}", labels.signatures);
        for block in &self.signatures {
            let signer = match block.signer {
                Signer::Agency => labels.agency,
                Signer::Client => labels.client,
            };
            let _ = writeln!(
                out,
                "  {signer}: {} {} / {}: {}",
                labels.signed_at,
                block.signed_at.format("%Y-%m-%d %H:%M UTC"),
                labels.fingerprint,
                block.fingerprint
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn signature(data: &str) -> Signature {
        Signature {
            data: data.to_string(),
            signed_at: Utc::now(),
            signer_id: Uuid::new_v4(),
        }
    }

    fn signed_contract() -> Contract {
        let now = Utc::now();
        Contract {
            id: Uuid::new_v4(),
            contract_number: "CTR-20260301-1A2B3C".to_string(),
            share_token: Uuid::new_v4().simple().to_string(),
            title: "Wedding photography".to_string(),
            client_id: Uuid::new_v4(),
            affiliate_id: None,
            total_amount: Decimal::new(100_000, 0),
            deposit_amount: Decimal::new(50_000, 0),
            remaining_amount: Decimal::new(50_000, 0),
            currency: "SAR".to_string(),
            payment_method: PaymentMethod::BankTransfer,
            terms: vec!["Full-day coverage".to_string(), "Edited album".to_string()],
            deposit_proof_required: false,
            commission_amount: None,
            commission_status: None,
            state: ContractState::Active,
            admin_signature: Some(signature("abc")),
            client_signature: Some(signature("data:image/png;base64,AAAA")),
            payment_proof: None,
            last_rejection: None,
            version: 3,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn parties() -> DocumentParties {
        DocumentParties {
            client: Party {
                name: "Lina Haddad".to_string(),
                email: "lina@example.com".to_string(),
            },
            affiliate: None,
        }
    }

    #[test]
    fn unsigned_contracts_are_refused() {
        let mut contract = signed_contract();
        contract.client_signature = None;
        contract.state = ContractState::PendingClientSignature;

        let err = render_contract(&contract, parties(), Locale::En).unwrap_err();
        assert_eq!(
            err,
            DocumentError::NotFullySigned {
                contract_number: contract.contract_number.clone(),
                state: ContractState::PendingClientSignature,
            }
        );
    }

    #[test]
    fn signatures_are_fingerprinted() {
        let document = render_contract(&signed_contract(), parties(), Locale::En).expect("render");
        assert_eq!(document.signatures.len(), 2);
        assert_eq!(
            document.signatures[0].fingerprint,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(document.signatures[1].signer, Signer::Client);
    }

    #[test]
    fn english_text_lists_amounts_and_terms() {
        let text = render_contract(&signed_contract(), parties(), Locale::En)
            .expect("render")
            .to_text();
        assert!(text.contains("Contract number: CTR-20260301-1A2B3C"));
        assert!(text.contains("Remaining: 50000.00 SAR"));
        assert!(text.contains("2. Edited album"));
        assert!(text.contains("Payment method: Bank transfer"));
    }

    #[test]
    fn arabic_text_switches_labels() {
        let text = render_contract(&signed_contract(), parties(), Locale::Ar)
            .expect("render")
            .to_text();
        assert!(text.contains("رقم العقد: CTR-20260301-1A2B3C"));
        assert!(text.contains("تحويل بنكي"));
        assert!(!text.contains("Contract number"));
    }

    #[test]
    fn locales_parse_case_insensitively() {
        assert_eq!("AR".parse::<Locale>(), Ok(Locale::Ar));
        assert_eq!(" en ".parse::<Locale>(), Ok(Locale::En));
        assert!("fr".parse::<Locale>().is_err());
    }
}
