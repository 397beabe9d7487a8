//! Valores monetários em ponto fixo.
//!
//! Todos os montantes circulam como inteiros da menor unidade, com
//! comparações exatas. A representação decimal (1 KD = 10^8 unidades)
//! aparece apenas nas CLIs.

use crate::{KaidosError, Result};

/// Valor monetário na menor unidade
pub type Amount = u64;

/// Unidades por 1 KD
pub const COIN: Amount = 100_000_000;

/// Recompensa inicial por bloco (50 KD)
pub const INITIAL_REWARD: Amount = 50 * COIN;

/// Intervalo de halving em blocos
pub const HALVING_INTERVAL: u64 = 210_000;

/// Recompensa de coinbase para a altura dada.
///
/// Divisão exata por potências de dois: cada halving desloca um bit.
#[must_use]
pub const fn block_reward(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= Amount::BITS as u64 {
        0
    } else {
        INITIAL_REWARD >> halvings
    }
}

/// Soma com verificação de overflow
///
/// # Errors
///
/// Retorna erro se a soma exceder a capacidade de `Amount`
pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Result<Amount> {
    let mut total = 0u64;
    for amount in amounts {
        total = total.checked_add(amount).ok_or_else(|| {
            KaidosError::InvalidTransaction("Amount overflow".to_string())
        })?;
    }
    Ok(total)
}

/// Formata um montante como KD decimal ("50", "19.5", "0.00000001")
#[must_use]
pub fn format_kd(amount: Amount) -> String {
    let whole = amount / COIN;
    let frac = amount % COIN;
    if frac == 0 {
        whole.to_string()
    } else {
        let frac = format!("{frac:08}");
        format!("{whole}.{}", frac.trim_end_matches('0'))
    }
}

/// Converte uma string decimal em KD para a menor unidade
///
/// # Errors
///
/// Retorna erro para entradas vazias, não numéricas, com mais de oito
/// casas decimais ou fora do intervalo representável
pub fn parse_kd(text: &str) -> Result<Amount> {
    let invalid = || KaidosError::InvalidTransaction(format!("Invalid amount: {text}"));

    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (text, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > 8 {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };

    let frac: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<8}");
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(COIN)
        .and_then(|units| units.checked_add(frac))
        .ok_or_else(invalid)
}
