//! Mock version of the rusb bulk handle
use crate::error::Result;
use mockall::mock;

use std::time::Duration;

mock! {
    #[derive(Debug)]
    pub UsbHandle {
        pub fn open(bus: u8, address: u8, interfaces: &[u8]) -> Result<Self>;
        pub fn read_bulk(
            &self,
            endpoint: u8,
            buf: &mut [u8],
            timeout: Duration,
        ) -> Result<usize>;
        pub fn write_bulk(
            &self,
            endpoint: u8,
            buf: &[u8],
            timeout: Duration,
        ) -> Result<usize>;
    }
}
