//! Armazenamento de carteiras: chaves RSA em PEM, endereços derivados e
//! registros multisig, persistidos em snapshot JSON num caminho
//! explícito.

use chrono::{DateTime, Utc};
use kaidos_core::{JsonStore, KeyResolver, MultisigRecord, TxInput};
use serde::{Deserialize, Serialize};
use shared::{
    decode_private_key_pem, derive_multisig_address, sign_input, verify_input, Hash256,
    KaidosError, KeyPair, Result,
};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Registro de uma carteira
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Identificador único
    pub wallet_id: String,
    /// Nome de exibição
    pub name: String,
    /// Instante de criação
    pub created_at: DateTime<Utc>,
    /// Indica se as chaves privadas desta carteira estão cifradas
    pub encrypted: bool,
}

/// Registro de um endereço e suas chaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Carteira dona do endereço
    pub wallet_id: String,
    /// Endereço derivado da chave pública
    pub address: String,
    /// Chave pública em PEM
    pub public_key: String,
    /// Chave privada em PKCS#8 PEM, cifrada quando a carteira é cifrada
    pub private_key: String,
    /// Instante de criação
    pub created_at: DateTime<Utc>,
}

/// Resultado da criação de uma carteira
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    pub wallet_id: String,
    pub address: String,
    pub public_key: String,
}

/// Resultado da criação de um endereço (sem a chave privada)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<&AddressRecord> for AddressInfo {
    fn from(record: &AddressRecord) -> Self {
        Self {
            address: record.address.clone(),
            public_key: record.public_key.clone(),
            created_at: record.created_at,
        }
    }
}

/// Documento persistido da carteira
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WalletData {
    wallets: Vec<WalletRecord>,
    addresses: Vec<AddressRecord>,
    multisig: Vec<MultisigRecord>,
}

/// Loja de carteiras sobre um arquivo JSON
#[derive(Debug)]
pub struct WalletStore {
    store: JsonStore<WalletData>,
    data: WalletData,
}

impl WalletStore {
    /// Abre (ou cria vazia) a loja no caminho dado
    ///
    /// # Errors
    ///
    /// Retorna `Database` se o snapshot existir e não puder ser lido
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = JsonStore::new(path);
        let data = store.load()?.unwrap_or_default();
        Ok(Self { store, data })
    }

    /// Caminho do snapshot
    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    fn save(&self) -> Result<()> {
        self.store.save(&self.data)
    }

    /// Cria uma carteira com um endereço inicial. Com senha, a chave
    /// privada é gravada cifrada.
    ///
    /// # Errors
    ///
    /// Retorna `KeyGeneration` se a geração ou a gravação falharem
    pub fn create_wallet(&mut self, passphrase: Option<&str>) -> Result<WalletInfo> {
        let wallet_id = Uuid::new_v4().to_string();

        let wallet = WalletRecord {
            wallet_id: wallet_id.clone(),
            name: format!("Wallet-{}", &wallet_id[..8]),
            created_at: Utc::now(),
            encrypted: passphrase.is_some(),
        };
        self.data.wallets.push(wallet);

        let address = self.create_address(&wallet_id, passphrase)?;
        info!(%wallet_id, address = %address.address, "wallet created");

        Ok(WalletInfo {
            wallet_id,
            address: address.address,
            public_key: address.public_key,
        })
    }

    /// Gera um novo endereço para uma carteira existente
    ///
    /// # Errors
    ///
    /// Retorna `KeyGeneration` se a carteira não existir, se a senha
    /// estiver ausente para uma carteira cifrada, ou se a geração falhar
    pub fn create_address(
        &mut self,
        wallet_id: &str,
        passphrase: Option<&str>,
    ) -> Result<AddressInfo> {
        let wallet = self.wallet(wallet_id).ok_or_else(|| {
            KaidosError::KeyGeneration(format!("Wallet not found: {wallet_id}"))
        })?;

        if wallet.encrypted && passphrase.is_none() {
            return Err(KaidosError::KeyGeneration(
                "Passphrase required for encrypted wallet".to_string(),
            ));
        }
        let passphrase = wallet.encrypted.then_some(passphrase).flatten();

        let keypair = KeyPair::generate()?;
        let record = AddressRecord {
            wallet_id: wallet_id.to_string(),
            address: keypair.address()?,
            public_key: keypair.public_key_pem()?,
            private_key: keypair.private_key_pem(passphrase)?,
            created_at: Utc::now(),
        };
        let info = AddressInfo::from(&record);

        self.data.addresses.push(record);
        self.save()?;

        Ok(info)
    }

    /// Obtém uma carteira pelo id
    #[must_use]
    pub fn wallet(&self, wallet_id: &str) -> Option<&WalletRecord> {
        self.data
            .wallets
            .iter()
            .find(|wallet| wallet.wallet_id == wallet_id)
    }

    /// Obtém a carteira dona de um endereço
    #[must_use]
    pub fn wallet_by_address(&self, address: &str) -> Option<&WalletRecord> {
        let record = self.address_record(address)?;
        self.wallet(&record.wallet_id)
    }

    /// Todas as carteiras
    #[must_use]
    pub fn list_wallets(&self) -> &[WalletRecord] {
        &self.data.wallets
    }

    /// Endereços de uma carteira, sem as chaves privadas
    #[must_use]
    pub fn list_addresses(&self, wallet_id: &str) -> Vec<AddressInfo> {
        self.data
            .addresses
            .iter()
            .filter(|record| record.wallet_id == wallet_id)
            .map(AddressInfo::from)
            .collect()
    }

    /// Registro completo de um endereço
    #[must_use]
    pub fn address_record(&self, address: &str) -> Option<&AddressRecord> {
        self.data
            .addresses
            .iter()
            .find(|record| record.address == address)
    }

    /// Assina o input `"<txid>:<vout>"` com a chave do endereço dado
    ///
    /// # Errors
    ///
    /// Retorna `Signature` se o endereço for desconhecido,
    /// `InvalidPassphrase` se a decifração falhar
    pub fn sign_transaction_input(
        &self,
        txid: &Hash256,
        vout: u32,
        address: &str,
        passphrase: Option<&str>,
    ) -> Result<String> {
        let record = self.address_record(address).ok_or_else(|| {
            KaidosError::Signature(format!("Address not found: {address}"))
        })?;

        let private_key = decode_private_key_pem(&record.private_key, passphrase)?;
        sign_input(&private_key, &txid.to_string(), vout)
    }

    /// Verifica a assinatura de um input contra um endereço conhecido
    #[must_use]
    pub fn verify_input_signature(&self, input: &TxInput, address: &str) -> bool {
        if input.multisig {
            return self
                .multisig_record(address)
                .is_some_and(|record| record.verify_input(input));
        }

        self.address_record(address).is_some_and(|record| {
            verify_input(
                &record.public_key,
                &input.txid.to_string(),
                input.vout,
                &input.signature,
            )
        })
    }

    /// Registra um endereço multisig m-de-n
    ///
    /// # Errors
    ///
    /// Retorna `KeyGeneration` se o limiar for inválido
    pub fn register_multisig(
        &mut self,
        public_keys: Vec<String>,
        required_signatures: usize,
    ) -> Result<MultisigRecord> {
        let address = derive_multisig_address(&public_keys, required_signatures)?;

        let record = MultisigRecord {
            address,
            public_keys,
            required_signatures,
            created_at: Utc::now(),
        };

        // Substitui um registro anterior do mesmo endereco
        self.data
            .multisig
            .retain(|existing| existing.address != record.address);
        self.data.multisig.push(record.clone());
        self.save()?;

        Ok(record)
    }

    /// Registro multisig de um endereço
    #[must_use]
    pub fn multisig_record(&self, address: &str) -> Option<&MultisigRecord> {
        self.data
            .multisig
            .iter()
            .find(|record| record.address == address)
    }
}

impl KeyResolver for WalletStore {
    fn public_key_pem(&self, address: &str) -> Option<String> {
        self.address_record(address)
            .map(|record| record.public_key.clone())
    }

    fn multisig_record(&self, address: &str) -> Option<MultisigRecord> {
        self.data
            .multisig
            .iter()
            .find(|record| record.address == address)
            .cloned()
    }
}
