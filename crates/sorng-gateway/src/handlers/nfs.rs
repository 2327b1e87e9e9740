//! ONC-RPC/NFSv3/MOUNT handler adapter (spec §4.7.a).
//!
//! File handles cross the JSON boundary hex-encoded, matching
//! `rpc_nfs::FileHandle`'s own `as_hex` serializer, so a caller can feed a
//! handle returned by `mount`/`lookup` straight into a later `read`/`write`
//! without the core keeping any session state (spec §6: "the core is
//! stateless across operations").

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::rpc_nfs::{self, FileHandle, Fattr3, FileType};
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 2049;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    export_path: Option<String>,
    name: Option<String>,
    file_handle: Option<String>,
    dir_handle: Option<String>,
    from_dir_handle: Option<String>,
    from_name: Option<String>,
    to_dir_handle: Option<String>,
    to_name: Option<String>,
    offset: Option<u64>,
    count: Option<u32>,
    data: Option<String>,
    mode: Option<u32>,
    cookie: Option<u64>,
}

fn decode_handle(field: &str, value: &Option<String>) -> GatewayResult<FileHandle> {
    let hex_str = value
        .as_deref()
        .ok_or_else(|| GatewayError::invalid_argument(format!("missing required field `{field}`")))?;
    let bytes = hex::decode(hex_str)
        .map_err(|e| GatewayError::invalid_argument(format!("`{field}` is not valid hex: {e}")))?;
    if bytes.len() > 64 {
        return Err(GatewayError::invalid_argument(format!(
            "`{field}` exceeds the 64-byte NFS file handle cap"
        )));
    }
    Ok(FileHandle(bytes))
}

fn require(field: &str, value: &Option<String>) -> GatewayResult<String> {
    value
        .clone()
        .ok_or_else(|| GatewayError::invalid_argument(format!("missing required field `{field}`")))
}

fn file_type_mnemonic(ftype: FileType) -> String {
    match ftype {
        FileType::Reg => "REG".to_string(),
        FileType::Dir => "DIR".to_string(),
        FileType::Blk => "BLK".to_string(),
        FileType::Chr => "CHR".to_string(),
        FileType::Lnk => "LNK".to_string(),
        FileType::Sock => "SOCK".to_string(),
        FileType::Fifo => "FIFO".to_string(),
        FileType::Unknown(n) => format!("UNKNOWN:{n}"),
    }
}

fn attrs_json(attrs: &Fattr3) -> Value {
    json!({
        "type": file_type_mnemonic(attrs.ftype),
        "mode": format!("{:04o}", attrs.mode & 0o7777),
        "size": attrs.size,
        "nlink": attrs.nlink,
        "uid": attrs.uid,
        "gid": attrs.gid,
        "fileid": attrs.fileid,
        "atimeSecs": attrs.atime_secs,
        "mtimeSecs": attrs.mtime_secs,
        "ctimeSecs": attrs.ctime_secs,
    })
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid nfs parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_plain(&p.conn.host, port, deadline).await?;

    match operation {
        "probeVersions" => {
            let probe = rpc_nfs::probe_versions(&mut transport, deadline).await?;
            Ok(serde_json::to_value(probe).unwrap())
        }
        "exportList" => {
            let exports = rpc_nfs::export_list(&mut transport, deadline).await?;
            Ok(serde_json::to_value(exports).unwrap())
        }
        "mount" => {
            let export_path = require("exportPath", &p.export_path)?;
            let handle = rpc_nfs::mount(&mut transport, &export_path, deadline).await?;
            Ok(json!({ "fileHandle": hex::encode(&handle.0) }))
        }
        "getattr" => {
            let handle = decode_handle("fileHandle", &p.file_handle)?;
            let attrs = rpc_nfs::getattr(&mut transport, &handle, deadline).await?;
            Ok(attrs_json(&attrs))
        }
        "lookup" => {
            let dir_handle = decode_handle("fileHandle", &p.file_handle)?;
            let name = require("name", &p.name)?;
            let result = rpc_nfs::lookup(&mut transport, &dir_handle, &name, deadline).await?;
            let mut v = json!({ "fileHandle": hex::encode(&result.handle.0) });
            if let Some(attrs) = &result.attrs {
                let attrs_v = attrs_json(attrs);
                v.as_object_mut().unwrap().extend(attrs_v.as_object().unwrap().clone());
            }
            Ok(v)
        }
        "read" => {
            let handle = decode_handle("fileHandle", &p.file_handle)?;
            let offset = p.offset.unwrap_or(0);
            let count = p.count.unwrap_or(8192);
            let result = rpc_nfs::read(&mut transport, &handle, offset, count, deadline).await?;
            Ok(json!({ "data": hex::encode(&result.data), "eof": result.eof }))
        }
        "write" => {
            let handle = decode_handle("fileHandle", &p.file_handle)?;
            let offset = p.offset.unwrap_or(0);
            let data_hex = require("data", &p.data)?;
            let data = hex::decode(&data_hex)
                .map_err(|e| GatewayError::invalid_argument(format!("`data` is not valid hex: {e}")))?;
            if data.len() > 65536 {
                return Err(GatewayError::invalid_argument("write payload exceeds the 64 KiB NFS WRITE cap"));
            }
            let written = rpc_nfs::write(&mut transport, &handle, offset, &data, deadline).await?;
            Ok(json!({ "count": written }))
        }
        "remove" => {
            let dir_handle = decode_handle("fileHandle", &p.dir_handle)?;
            let name = require("name", &p.name)?;
            rpc_nfs::remove(&mut transport, &dir_handle, &name, deadline).await?;
            Ok(json!({}))
        }
        "rmdir" => {
            let dir_handle = decode_handle("fileHandle", &p.dir_handle)?;
            let name = require("name", &p.name)?;
            rpc_nfs::rmdir(&mut transport, &dir_handle, &name, deadline).await?;
            Ok(json!({}))
        }
        "mkdir" => {
            let dir_handle = decode_handle("fileHandle", &p.dir_handle)?;
            let name = require("name", &p.name)?;
            let mode = p.mode.unwrap_or(0o755);
            let result = rpc_nfs::mkdir(&mut transport, &dir_handle, &name, mode, deadline).await?;
            Ok(json!({ "fileHandle": hex::encode(&result.handle.0) }))
        }
        "rename" => {
            let from_dir = decode_handle("fromDirHandle", &p.from_dir_handle)?;
            let from_name = require("fromName", &p.from_name)?;
            let to_dir = decode_handle("toDirHandle", &p.to_dir_handle)?;
            let to_name = require("toName", &p.to_name)?;
            rpc_nfs::rename(&mut transport, &from_dir, &from_name, &to_dir, &to_name, deadline).await?;
            Ok(json!({}))
        }
        "readdir" => {
            let dir_handle = decode_handle("fileHandle", &p.dir_handle)?;
            let cookie = p.cookie.unwrap_or(0);
            let count = p.count.unwrap_or(8192);
            let entries = rpc_nfs::readdir(&mut transport, &dir_handle, cookie, count, deadline).await?;
            Ok(serde_json::to_value(entries).unwrap())
        }
        other => Err(GatewayError::invalid_argument(format!("unknown nfs operation `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_hex_file_handle() {
        let err = decode_handle("fileHandle", &Some("not-hex".to_string())).unwrap_err();
        assert_eq!(err.kind, sorng_wire::ErrorKind::InvalidArgument);
    }

    #[test]
    fn rejects_oversized_file_handle() {
        let oversized = hex::encode(vec![0u8; 65]);
        let err = decode_handle("fileHandle", &Some(oversized)).unwrap_err();
        assert_eq!(err.kind, sorng_wire::ErrorKind::InvalidArgument);
    }

    #[test]
    fn file_type_mnemonics_match_scenario_vocabulary() {
        assert_eq!(file_type_mnemonic(FileType::Reg), "REG");
        assert_eq!(file_type_mnemonic(FileType::Dir), "DIR");
    }
}
