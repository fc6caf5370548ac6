use thiserror::Error;

/// Errors surfaced by the service's public operations.
///
/// Every variant maps to a stable error code so API surfaces and tests can
/// match on the kind of failure instead of message text. Collaborator
/// failures that need no extra context pass through via [`ServiceError::Upstream`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("could not find currency: {0}")]
    CurrencyNotFound(String),

    #[error("could not find pair with id: {0}")]
    PairNotFound(String),

    #[error("could not find swap with id: {0}")]
    SwapNotFound(String),

    #[error("could not find order side: {0}")]
    OrderSideNotFound(String),

    #[error("{0} has no LND client")]
    NoLndClient(String),

    #[error("not supported by {0}")]
    NotSupportedBySymbol(String),

    #[error("the Ethereum integration is not enabled")]
    EthereumNotEnabled,

    #[error("undefined parameter: {0}")]
    UndefinedParameter(&'static str),

    #[error("{param} is not supported on {symbol}")]
    UnsupportedParameter {
        symbol: String,
        param: &'static str,
    },

    #[error("invalid Ethereum address")]
    InvalidEthereumAddress,

    #[error("{0} is not a whole number")]
    NotWholeNumber(f64),

    #[error("invalid pair hash")]
    InvalidPairHash,

    #[error("the preimage hash of the invoice does not match the one of the swap")]
    InvoiceInvalidPreimageHash,

    #[error("a swap with this preimage hash exists already")]
    SwapWithPreimageExists,

    #[error("a swap with this invoice exists already")]
    SwapWithInvoiceExists,

    #[error("swap {0} has an invoice already")]
    SwapHasInvoiceAlready(String),

    #[error("swap {0} has no lockup transaction")]
    SwapNoLockup(String),

    #[error("invoice amount exceeds the maximal of {0}")]
    InvalidInvoiceAmount(u64),

    #[error("{amount} is beneath minimal of {minimal}")]
    BeneathMinimalAmount { amount: u64, minimal: u64 },

    #[error("{amount} exceeds maximal of {maximal}")]
    ExceedMaximalAmount { amount: u64, maximal: u64 },

    #[error("onchain amount is too low")]
    OnchainAmountTooLow,

    #[error("reverse swaps are disabled")]
    ReverseSwapsDisabled,

    #[error("maximal inbound liquidity is {0}%")]
    ExceedsMaxInboundLiquidity(u64),

    #[error("minimal inbound liquidity is {0}%")]
    BeneathMinInboundLiquidity(u64),

    #[error("not both invoice and onchain amount can be specified")]
    InvoiceAndOnchainAmountSpecified,

    #[error("no amount was specified")]
    NoAmountSpecified,

    #[error("referral IDs cannot be empty")]
    ReferralIdEmpty,

    #[error("referral fee share must be between 0 and 100")]
    InvalidReferralFeeShare,

    /// A refund transaction was broadcast before its HTLC timed out. The
    /// original chain rejection is kept verbatim alongside the timeout the
    /// caller has to wait for.
    #[error("{error}")]
    PrematureRefund {
        error: String,
        timeout_block_height: u32,
        timeout_eta: u64,
    },

    /// Collaborator errors surfaced to the caller verbatim.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CurrencyNotFound(_) => "CURRENCY_NOT_FOUND",
            Self::PairNotFound(_) => "PAIR_NOT_FOUND",
            Self::SwapNotFound(_) => "SWAP_NOT_FOUND",
            Self::OrderSideNotFound(_) => "ORDER_SIDE_NOT_FOUND",
            Self::NoLndClient(_) => "NO_LND_CLIENT",
            Self::NotSupportedBySymbol(_) => "NOT_SUPPORTED_BY_SYMBOL",
            Self::EthereumNotEnabled => "ETHEREUM_NOT_ENABLED",
            Self::UndefinedParameter(_) => "UNDEFINED_PARAMETER",
            Self::UnsupportedParameter { .. } => "UNSUPPORTED_PARAMETER",
            Self::InvalidEthereumAddress => "INVALID_ETHEREUM_ADDRESS",
            Self::NotWholeNumber(_) => "NOT_WHOLE_NUMBER",
            Self::InvalidPairHash => "INVALID_PAIR_HASH",
            Self::InvoiceInvalidPreimageHash => "INVOICE_INVALID_PREIMAGE_HASH",
            Self::SwapWithPreimageExists => "SWAP_WITH_PREIMAGE_EXISTS",
            Self::SwapWithInvoiceExists => "SWAP_WITH_INVOICE_EXISTS",
            Self::SwapHasInvoiceAlready(_) => "SWAP_HAS_INVOICE_ALREADY",
            Self::SwapNoLockup(_) => "SWAP_NO_LOCKUP",
            Self::InvalidInvoiceAmount(_) => "INVALID_INVOICE_AMOUNT",
            Self::BeneathMinimalAmount { .. } => "BENEATH_MINIMAL_AMOUNT",
            Self::ExceedMaximalAmount { .. } => "EXCEED_MAXIMAL_AMOUNT",
            Self::OnchainAmountTooLow => "ONCHAIN_AMOUNT_TOO_LOW",
            Self::ReverseSwapsDisabled => "REVERSE_SWAPS_DISABLED",
            Self::ExceedsMaxInboundLiquidity(_) => "EXCEEDS_MAX_INBOUND_LIQUIDITY",
            Self::BeneathMinInboundLiquidity(_) => "BENEATH_MIN_INBOUND_LIQUIDITY",
            Self::InvoiceAndOnchainAmountSpecified => "INVOICE_AND_ONCHAIN_AMOUNT_SPECIFIED",
            Self::NoAmountSpecified => "NO_AMOUNT_SPECIFIED",
            Self::ReferralIdEmpty | Self::InvalidReferralFeeShare => "INVALID_REFERRAL",
            Self::PrematureRefund { .. } => "PREMATURE_REFUND",
            Self::Upstream(_) => "UPSTREAM",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
