// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

sol! {
    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Coin {
        string denom;
        uint256 amount;
    }

    // Generic message container; `value` is the ABI encoding of the concrete record.
    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Any {
        string type_url;
        bytes value;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct SequencerMsg {
        bytes chain_id;
        bytes data;
        string from_address;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct MsgSend {
        string from_address;
        string to_address;
        Coin[] amount;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Fee {
        Coin[] amount;
        uint64 gas_limit;
        string payer;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct SignerInfo {
        bytes public_key;
        uint64 sequence;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct AuthInfo {
        SignerInfo[] signer_infos;
        Fee fee;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct TxBody {
        Any[] messages;
        string memo;
        uint64 timeout_height;
        string chain_id;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Tx {
        TxBody body;
        AuthInfo auth_info;
        bytes[] signatures;
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct SignDoc {
        TxBody body;
        AuthInfo auth_info;
        uint64 account_number;
    }
}
