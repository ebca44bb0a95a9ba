use atelier_core::PaymentMethod;

use crate::Locale;

pub(crate) struct Labels {
    pub contract_number: &'static str,
    pub effective_date: &'static str,
    pub parties: &'static str,
    pub client: &'static str,
    pub affiliate: &'static str,
    pub agency: &'static str,
    pub amounts: &'static str,
    pub total: &'static str,
    pub deposit: &'static str,
    pub remaining: &'static str,
    pub payment_method: &'static str,
    pub terms: &'static str,
    pub signatures: &'static str,
    pub signed_at: &'static str,
    pub fingerprint: &'static str,
    payment_methods: [&'static str; 5],
}

static EN: Labels = Labels {
    contract_number: "Contract number",
    effective_date: "Effective date",
    parties: "Parties",
    client: "Client",
    affiliate: "Affiliate",
    agency: "Agency",
    amounts: "Amounts",
    total: "Total",
    deposit: "Deposit",
    remaining: "Remaining",
    payment_method: "Payment method",
    terms: "Terms",
    signatures: "Signatures",
    signed_at: "signed",
    fingerprint: "fingerprint",
    payment_methods: ["Bank transfer", "Cash", "Card", "Cheque", "Other"],
};

static AR: Labels = Labels {
    contract_number: "رقم العقد",
    effective_date: "تاريخ السريان",
    parties: "الأطراف",
    client: "العميل",
    affiliate: "الوسيط",
    agency: "الوكالة",
    amounts: "المبالغ",
    total: "الإجمالي",
    deposit: "العربون",
    remaining: "المتبقي",
    payment_method: "طريقة الدفع",
    terms: "البنود",
    signatures: "التوقيعات",
    signed_at: "وقّع في",
    fingerprint: "البصمة",
    payment_methods: ["تحويل بنكي", "نقداً", "بطاقة", "شيك", "أخرى"],
};

impl Labels {
    pub(crate) fn for_locale(locale: Locale) -> &'static Labels {
        match locale {
            Locale::En => &EN,
            Locale::Ar => &AR,
        }
    }

    pub(crate) fn payment_method_name(&self, method: PaymentMethod) -> &'static str {
        let index = match method {
            PaymentMethod::BankTransfer => 0,
            PaymentMethod::Cash => 1,
            PaymentMethod::Card => 2,
            PaymentMethod::Cheque => 3,
            PaymentMethod::Other => 4,
        };
        self.payment_methods[index]
    }
}
