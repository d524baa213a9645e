use crate::block::Block;
use serde::{Deserialize, Deserializer, Serialize};
use shared::{Address, Amount, BlockchainError, KeyPair, Nonce, PublicKey, Signature, TxId};
use shared::{Hash256, Result};
use std::collections::BTreeMap;

/// Prefixo que distingue hashes de transação de hashes de bloco
const TX_TAG: &str = "TX";

/// Transferência de ouro assinada. Imutável depois de assinada: a identidade
/// cobre todos os campos exceto `sig`, e a assinatura cobre a identidade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Endereço do remetente; deve derivar de `pub_key`
    pub from: Address,
    /// Contador monotônico por remetente, começando em 0
    pub nonce: Nonce,
    /// Chave pública do remetente
    pub pub_key: PublicKey,
    /// Assinatura sobre a identidade; ausente até `sign`
    pub sig: Option<Signature>,
    /// Destinatários e valores
    pub outputs: BTreeMap<Address, Amount>,
    /// Taxa paga ao minerador
    pub fee: Amount,
    /// Carga opaca, incluída na identidade
    pub data: String,
    #[serde(skip_serializing)]
    id: TxId,
}

/// Forma canônica da identidade: tudo menos a assinatura.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRepr<'a> {
    from: &'a Address,
    nonce: Nonce,
    pub_key: &'a PublicKey,
    outputs: &'a BTreeMap<Address, Amount>,
    fee: Amount,
    data: &'a str,
}

impl Transaction {
    /// Cria uma transação ainda não assinada
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica da identidade falhar
    pub fn new(
        from: Address,
        nonce: Nonce,
        pub_key: PublicKey,
        outputs: BTreeMap<Address, Amount>,
        fee: Amount,
        data: String,
    ) -> Result<Self> {
        let id = compute_id(&from, nonce, &pub_key, &outputs, fee, &data)?;
        Ok(Self {
            from,
            nonce,
            pub_key,
            sig: None,
            outputs,
            fee,
            data,
            id,
        })
    }

    /// Identidade da transação, estável sob assinatura
    #[must_use]
    pub const fn id(&self) -> TxId {
        self.id
    }

    /// Assina a transação com o par de chaves do remetente
    ///
    /// # Errors
    ///
    /// Retorna erro se a operação de assinatura falhar
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<()> {
        self.sig = Some(keypair.sign(&self.id)?);
        Ok(())
    }

    /// Verdadeiro se a assinatura existe, o endereço corresponde à chave
    /// pública e a assinatura confere sobre a identidade
    #[must_use]
    pub fn valid_signature(&self) -> bool {
        match &self.sig {
            Some(sig) => {
                shared::address_matches_key(&self.from, &self.pub_key)
                    && sig.verify(&self.pub_key, &self.id)
            }
            None => false,
        }
    }

    /// Valor total movimentado: taxa mais a soma das saídas
    #[must_use]
    pub fn total_output(&self) -> Amount {
        self.outputs
            .values()
            .fold(self.fee, |acc, v| acc.saturating_add(*v))
    }

    /// Verdadeiro se o saldo do remetente no bloco dado cobre a transação
    #[must_use]
    pub fn sufficient_funds(&self, block: &Block) -> bool {
        self.total_output() <= block.balance_of(&self.from)
    }

    /// Ordem canônica de aplicação dentro de um bloco: remetente, depois
    /// nonce, depois id. Construção e reexecução usam a mesma ordem; sem
    /// isso, um bloco com dependência entre remetentes validaria aqui e
    /// falharia na reexecução dos pares.
    #[must_use]
    pub fn canonical_order(a: &Self, b: &Self) -> std::cmp::Ordering {
        (&a.from, a.nonce, a.id).cmp(&(&b.from, b.nonce, b.id))
    }
}

fn compute_id(
    from: &Address,
    nonce: Nonce,
    pub_key: &PublicKey,
    outputs: &BTreeMap<Address, Amount>,
    fee: Amount,
    data: &str,
) -> Result<TxId> {
    let repr = IdentityRepr {
        from,
        nonce,
        pub_key,
        outputs,
        fee,
        data,
    };
    let json = serde_json::to_string(&repr)
        .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
    Ok(Hash256::sha256(format!("{TX_TAG}{json}").as_bytes()))
}

// A identidade não viaja no fio: é recalculada na desserialização, de modo
// que um par não consegue anunciar um id que não corresponda ao conteúdo.
impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            from: Address,
            nonce: Nonce,
            pub_key: PublicKey,
            sig: Option<Signature>,
            outputs: BTreeMap<Address, Amount>,
            fee: Amount,
            data: String,
        }

        let w = Wire::deserialize(deserializer)?;
        let id = compute_id(&w.from, w.nonce, &w.pub_key, &w.outputs, w.fee, &w.data)
            .map_err(serde::de::Error::custom)?;
        Ok(Self {
            from: w.from,
            nonce: w.nonce,
            pub_key: w.pub_key,
            sig: w.sig,
            outputs: w.outputs,
            fee: w.fee,
            data: w.data,
            id,
        })
    }
}
