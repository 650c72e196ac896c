use std::io::{Read, Write};
use std::net::TcpStream;

fn main() {
    let mut s = TcpStream::connect("127.0.0.1:6379").expect("connect");

    let mut buf = [0u8; 128];
    let n = s.read(&mut buf).unwrap();
    print!("{}", String::from_utf8_lossy(&buf[..n])); // accept-time +OK banner

    s.write_all(b"SET hello world\r\n").unwrap();
    let n = s.read(&mut buf).unwrap();
    print!("{}", String::from_utf8_lossy(&buf[..n]));

    s.write_all(b"GET hello\r\n").unwrap();
    let n = s.read(&mut buf).unwrap();
    print!("{}", String::from_utf8_lossy(&buf[..n]));
}
